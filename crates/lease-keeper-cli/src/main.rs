use lease_keeper_cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!(error = %e, "lease-keeper failed");
        // The log filter may hide the error, or logging never started.
        eprintln!("Error: {}", e);

        std::process::exit(e.exit_code());
    }
}
