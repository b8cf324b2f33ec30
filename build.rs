use std::process::Command;

const UNKNOWN: &str = "unknown";

fn forward(name: &str, source: &str, fallback: &str) {
    println!("cargo:rerun-if-env-changed={source}");
    let value = std::env::var(source).unwrap_or_else(|_| fallback.to_string());
    println!("cargo:rustc-env={name}={value}");
}

fn main() {
    let package_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| UNKNOWN.into());
    forward("VERSION", "MDC_VERSION", &package_version);
    forward("COMMIT", "MDC_COMMIT", UNKNOWN);
    forward("DATE", "MDC_BUILD_DATE", UNKNOWN);
    forward("OS", "CARGO_CFG_TARGET_OS", UNKNOWN);
    forward("ARCH", "CARGO_CFG_TARGET_ARCH", UNKNOWN);

    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let rustc_version = Command::new(rustc)
        .arg("--version")
        .output()
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_else(|_| UNKNOWN.to_string());
    println!("cargo:rustc-env=RUSTC_VERSION={rustc_version}");
}
