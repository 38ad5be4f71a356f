use std::env;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    if let Err(e) = rxfer::cli::run(args).await {
        eprintln!("Error: {e}");
        if matches!(e, rxfer::Error::InvalidRequest(_)) {
            eprintln!();
            rxfer::cli::print_usage();
        }
        std::process::exit(1);
    }
}
