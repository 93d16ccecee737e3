use std::env;
use std::process::Command;

/// Trimmed stdout of a successful git command
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Some(text)
}

fn main() {
    println!("cargo:rerun-if-env-changed=GRNPERM_GIT_SHA");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    // packaged builds have no .git: the revision can be passed in
    let revision = env::var("GRNPERM_GIT_SHA")
        .ok()
        .map(|sha| sha.trim().to_string())
        .filter(|sha| !sha.is_empty())
        .or_else(|| {
            let sha = git(&["rev-parse", "--short", "HEAD"]).filter(|sha| !sha.is_empty())?;
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).map_or(false, |s| !s.is_empty());
            Some(if dirty { format!("{}-dirty", sha) } else { sha })
        })
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GRNPERM_GIT_SHA={}", revision);
}
