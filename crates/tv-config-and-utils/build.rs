fn main() {
    // option_env!() values are cached by cargo unless these are tracked.
    println!("cargo:rerun-if-env-changed=PIXLME_API_BASE_URL");
}
