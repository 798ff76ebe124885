use std::process;

use tracing_subscriber::EnvFilter;
use vzm2sms::cli::Cli;

fn main() {
    let matches = Cli::build_command().get_matches();

    // Logs go to stderr; stdout may be the XML document itself.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(Cli::log_filter(&matches))),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = Cli::run_with_matches(matches) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}
