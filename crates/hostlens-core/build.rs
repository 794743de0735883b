//! Build script for hostlens-core
//!
//! Checks the toolchain and target before compilation:
//! - Minimum Rust version (let-else needs 1.65)
//! - Pointer width (native call slots are passed as 64-bit words)

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    let min_rust_version = rustc_version::Version::new(1, 65, 0);
    match rustc_version::version() {
        Ok(version) if version < min_rust_version => {
            panic!("hostlens-core requires Rust {min_rust_version} or newer, found {version}");
        }
        Ok(_) => {}
        // Some build environments hide the compiler version
        Err(_) => println!("cargo:warning=could not verify Rust version"),
    }

    let width = std::env::var("CARGO_CFG_TARGET_POINTER_WIDTH").unwrap_or_default();
    if width != "64" {
        println!(
            "cargo:warning=hostlens-core targets 64-bit runtimes; native calls and overlays assume 8-byte pointers \
             (target pointer width: {width})"
        );
    }
}
