//! Entry point for the faultline binary. Parses command-line arguments,
//! builds the proxy engine and runs it until interrupted.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    faultline_cli::run_cli().await
}
