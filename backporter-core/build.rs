fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Deployments without a .git directory pass the hash in explicitly
    println!("cargo:rerun-if-env-changed=BACKPORTER_GIT_HASH");
    if let Ok(hash) = std::env::var("BACKPORTER_GIT_HASH") {
        println!("cargo:rustc-env=BACKPORTER_GIT_HASH={}", hash);
    }
}
