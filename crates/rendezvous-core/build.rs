//! Build script for rendezvous-core
//!
//! Checks system requirements before compilation:
//! - Minimum Rust version (let-else needs Rust 1.65+)
//! - Target platform (signal numbers, interrupt waiting and the breakpoint
//!   trap come from POSIX, so only Unix targets are supported)

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 65, 0);

        if rustc_version < min_rust_version {
            panic!(
                "rendezvous-core requires Rust {} or newer, found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    // CARGO_CFG_UNIX describes the target, not the host running this script
    if std::env::var_os("CARGO_CFG_UNIX").is_none() {
        let target = std::env::var("TARGET").unwrap_or_default();
        panic!("rendezvous-core supports Unix targets only, found {target}");
    }
}
