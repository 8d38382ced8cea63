//! `lmsguard exec <file>`: one sandboxed run, outcome printed as JSON.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use lmsguard_tools::TrustContext;

pub async fn run(config_path: &Path, file: &Path) -> Result<()> {
    let config = lmsguard_config::load_and_prepare(config_path).await?;
    crate::init_logging(&config);

    let code = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read guest program: {}", crate::display(file)))?;

    let context = TrustContext::new(config);
    info!(mode = %context.runner().policy().effective_mode(), "[Exec] Running guest program");
    let outcome = context.execute_code(&code).await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
