//! Binary entrypoint for the logvault archiver.

#[tokio::main]
async fn main() {
    let code = logvault_cli::run().await;
    std::process::exit(code);
}
