fn main() {
    if let Err(err) = coralinedb::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
