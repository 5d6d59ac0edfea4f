fn main() {
    if let Err(err) = revenue_pipeline::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
