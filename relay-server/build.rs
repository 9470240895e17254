use std::process::Command;

fn main() {
    // Rerun if environment variables change
    println!("cargo:rerun-if-env-changed=PACKAGE_VERSION");
    println!("cargo:rerun-if-env-changed=FILE_VERSION");

    let build_info = generate_build_info();
    println!("cargo:rustc-env=BUILD_INFO={}", build_info);

    // Rerun if .git/HEAD changes
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/refs/heads");
}

fn generate_build_info() -> String {
    // Version information provided by CI/CD takes precedence
    if let Ok(file_ver) = std::env::var("FILE_VERSION") {
        return format!("{}+ci", file_ver);
    }

    let base_version = git(&["describe", "--tags", "--abbrev=0", "--match", "v[0-9]*"])
        .map(|s| s.trim_start_matches('v').to_string())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    let commit_count = git(&["rev-list", "--count", "HEAD"])
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0);
    let commit_hash = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    let dirty_suffix = if is_dirty() { "-dirty" } else { "" };

    format!(
        "{}+build.{}.{}{}",
        base_version, commit_count, commit_hash, dirty_suffix
    )
}

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout).ok()
            } else {
                None
            }
        })
        .map(|s| s.trim().to_string())
}

fn is_dirty() -> bool {
    Command::new("git")
        .args(["diff", "--quiet"])
        .status()
        .map(|status| !status.success())
        .unwrap_or(false)
}
