fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Lets packaged builds stamp a revision when there is no .git directory.
    println!("cargo:rerun-if-env-changed=BORKED_GIT_HASH");
    if let Ok(hash) = std::env::var("BORKED_GIT_HASH") {
        println!("cargo:rustc-env=BORKED_GIT_HASH={}", hash);
    }
}
