use std::process::Command;

/// Git queries baked into the binary, reported in the startup banner and
/// the `x-service-version` header.
const GIT_VARS: [(&str, &[&str]); 2] = [
    ("BUILD_COMMIT", &["rev-parse", "--short", "HEAD"]),
    ("BUILD_BRANCH", &["rev-parse", "--abbrev-ref", "HEAD"]),
];

fn main() {
    println!(
        "cargo:rustc-env=BUILD_DATE={}",
        chrono::Utc::now().to_rfc3339()
    );

    for (name, args) in GIT_VARS {
        let value = git(args).unwrap_or_else(|| "unknown".to_owned());
        println!("cargo:rustc-env={name}={value}");
    }

    println!("cargo:rerun-if-changed=../.git/HEAD");
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_owned())
}
