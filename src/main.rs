use rotalog::cli::{print_error, Cli};
use tracing_subscriber::EnvFilter;

fn main() {
    // Diagnostics go to stderr so stdout stays free for --tee
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = Cli::run() {
        print_error(&e.to_string());
        std::process::exit(1);
    }
}
