fn main() {
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();
    tidemark::app::logging::init();
    if let Err(err) = tidemark::app::cli::run() {
        eprintln!("error: {}", err.message);
        std::process::exit(1);
    }
}
