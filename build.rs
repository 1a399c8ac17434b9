//! Build script for fanout
//!
//! Embeds the git revision, build time, target and compiler into the binary.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = capture("git", &["rev-parse", "--short=8", "HEAD"]);
    let git_dirty = match Command::new("git").args(["status", "--porcelain"]).output() {
        Ok(output) if output.status.success() => (!output.stdout.is_empty()).to_string(),
        _ => "unknown".to_string(),
    };

    let vars = [
        ("FANOUT_GIT_HASH", git_hash),
        ("FANOUT_GIT_DIRTY", git_dirty),
        (
            "FANOUT_BUILD_TIMESTAMP",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("FANOUT_TARGET", env::var("TARGET").unwrap_or_else(|_| "unknown".into())),
        ("FANOUT_PROFILE", env::var("PROFILE").unwrap_or_else(|_| "unknown".into())),
        ("FANOUT_RUSTC_VERSION", capture("rustc", &["--version"])),
    ];
    for (name, value) in vars {
        println!("cargo:rustc-env={}={}", name, value);
    }
}

/// Trimmed stdout of a successful command, "unknown" otherwise
fn capture(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
