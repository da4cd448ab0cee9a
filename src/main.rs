fn main() {
    if let Err(err) = keep_awake_lib::run() {
        eprintln!("keep-awake: {err:#}");
        std::process::exit(1);
    }
}
