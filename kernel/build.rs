use std::process::Command;

fn main() {
    // Embed the git revision and build time for the boot banner.
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=GIT_HASH={}", git_hash.trim());

    let build_timestamp = Command::new("date")
        .args(["+%s"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_else(|| "0".to_string());
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp.trim());

    // bootloader 0.11 links the PIE kernel itself; no custom linker
    // script is needed for x86_64-unknown-none.
    println!("cargo:rerun-if-env-changed=TEPHRA_CMDLINE");
}
