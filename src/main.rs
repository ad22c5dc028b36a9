fn main() {
    if let Err(err) = csv_to_trino::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
