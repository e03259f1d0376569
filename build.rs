//! Stamps the binary with the version and commit it was built from; main.rs
//! prints both in its startup log line. CI can pin either value through
//! `MPD_BRIDGE_VERSION` / `MPD_BRIDGE_GIT_SHA`.

use std::process::Command;

fn main() {
    let version = std::env::var("MPD_BRIDGE_VERSION").unwrap_or_else(|_| {
        std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".into())
    });
    println!("cargo:rustc-env=MPD_BRIDGE_VERSION={}", version);

    let git_sha = std::env::var("MPD_BRIDGE_GIT_SHA")
        .or_else(|_| {
            std::env::var("GITHUB_SHA").map(|s| s.chars().take(7).collect::<String>())
        })
        .unwrap_or_else(|_| get_git_sha());
    println!("cargo:rustc-env=MPD_BRIDGE_GIT_SHA={}", git_sha);

    println!("cargo:rerun-if-env-changed=MPD_BRIDGE_VERSION");
    println!("cargo:rerun-if-env-changed=MPD_BRIDGE_GIT_SHA");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
}

fn get_git_sha() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|o| {
            if o.status.success() {
                String::from_utf8(o.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
            } else {
                None
            }
        })
        .unwrap_or_else(|| "unknown".into())
}
