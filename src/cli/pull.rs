//! Pull model from HuggingFace Hub

use std::path::PathBuf;

use anyhow::Result;

use crate::loader::{download_file, download_model};

/// Download a checkpoint (or one file of it) for later `generate` runs
pub fn pull(repo: String, file: Option<String>, output: Option<PathBuf>) -> Result<()> {
    let output_dir = output.unwrap_or_else(|| PathBuf::from("./models"));

    tracing::info!("Downloading from: {}", repo);

    match file {
        Some(filename) => {
            let dest = download_file(&repo, &filename, &output_dir)?;
            tracing::info!("Downloaded to: {}", dest.display());
        }
        None => {
            let model_dir = download_model(&repo, &output_dir)?;
            tracing::info!("Model downloaded to: {}", model_dir.display());
        }
    }

    Ok(())
}
