use std::path::Path;
use std::process::Command;

/// Commit shown by `dgi-broker --version`. Source tarballs have no `.git`,
/// so packagers can pass the hash in through `DGI_GIT_HASH` instead.
fn git_hash() -> Option<String> {
    if let Ok(hash) = std::env::var("DGI_GIT_HASH") {
        return Some(hash);
    }
    let output = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    Some(hash.trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=DGI_GIT_HASH");
    if Path::new(".git/HEAD").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
        println!("cargo:rerun-if-changed=.git/index");
    }

    let hash = git_hash().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=GIT_HASH={hash}");
}
