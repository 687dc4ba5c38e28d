use std::process::Command;

fn main() {
    // Reproducible builds pin the timestamp through SOURCE_DATE_EPOCH.
    let built_at = match std::env::var("SOURCE_DATE_EPOCH") {
        Ok(epoch) => command_output("date", &["-u", "-d", &format!("@{epoch}"), "+%Y-%m-%dT%H:%M:%SZ"]),
        Err(_) => command_output("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"]),
    };
    let git_sha = command_output("git", &["rev-parse", "--short", "HEAD"]);

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        built_at.as_deref().unwrap_or("unknown")
    );
    println!(
        "cargo:rustc-env=BUILD_GIT_SHA={}",
        git_sha.as_deref().unwrap_or("unknown")
    );
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=.git/HEAD");
}

/// Trimmed stdout of a successful command.
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string()).filter(|s| !s.is_empty())
}
