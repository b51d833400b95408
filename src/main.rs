use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    onboard_cli::cli::run().await
}
