//! Exposes the workspace `VERSION` file as `OAB_KIOSK_VERSION`.

use std::path::Path;

fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("cargo sets CARGO_MANIFEST_DIR");
    let version_path = Path::new(&manifest_dir)
        .ancestors()
        .nth(2)
        .expect("crate lives under <workspace>/crates")
        .join("VERSION");

    println!("cargo:rerun-if-changed={}", version_path.display());

    let contents = std::fs::read_to_string(&version_path)
        .unwrap_or_else(|error| panic!("cannot read {}: {error}", version_path.display()));
    let version = contents.trim();
    if version.is_empty() {
        panic!("{} must not be empty", version_path.display());
    }

    println!("cargo:rustc-env=OAB_KIOSK_VERSION={version}");
}
