//! Get command implementation

use anyhow::{Context, Result};
use ecp_lib::{CredentialProviderClient, Credentials, ImageReference, ProviderConfig, SelectionPolicy};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

pub struct GetArgs {
    pub image: String,
    pub host: Option<String>,
    pub plugin: PathBuf,
    pub timeout: u64,
    pub selection: SelectionPolicy,
}

pub async fn run(args: GetArgs) -> Result<()> {
    let image = ImageReference::parse(&args.image)?;
    let host = args.host.unwrap_or_else(|| image.host().to_string());

    let config = ProviderConfig::new(args.plugin)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_selection(args.selection);
    let client = CredentialProviderClient::new(config)?;
    tracing::debug!(plugin = %client.config().binary_path().display(), %host, "fetching credentials");

    let credentials = client
        .fetch_credentials(&image, &host)
        .await
        .with_context(|| format!("Failed to get credentials for {}", image))?;

    println!("{}", render(&credentials));

    Ok(())
}

fn render(credentials: &Credentials) -> String {
    json!({
        "username": credentials.username(),
        "password": credentials.password(),
    })
    .to_string()
}
