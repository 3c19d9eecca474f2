//! Model resolution and Hugging Face Hub downloads

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use hf_hub::api::sync::Api;

/// Files fetched for a SafeTensors checkpoint; missing ones are skipped
pub const MODEL_FILES: &[&str] = &[
    "config.json",
    "model.safetensors",
    "tokenizer.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
];

/// Local directory name for a repository id (`openai-community/gpt2` -> `gpt2`)
pub fn local_name(repo: &str) -> &str {
    repo.rsplit('/').next().unwrap_or(repo)
}

/// Find a model on disk, downloading it from the Hub when it is not there.
///
/// `model` is tried as a path, then as a name under `model_dir`, then as a
/// repository id whose files are placed in `model_dir`.
pub fn resolve_model(model: &str, model_dir: &Path) -> Result<PathBuf> {
    let direct = PathBuf::from(model);
    if direct.exists() {
        return Ok(direct);
    }

    for candidate in [model_dir.join(model), model_dir.join(local_name(model))] {
        if candidate.exists() {
            tracing::debug!("Resolved model {} to {}", model, candidate.display());
            return Ok(candidate);
        }
    }

    tracing::info!(
        "Model {} not found locally, downloading into {}",
        model,
        model_dir.display()
    );
    download_model(model, model_dir)
}

/// Download the standard checkpoint files of `repo` into
/// `output_dir/<name>` and return that directory
pub fn download_model(repo: &str, output_dir: &Path) -> Result<PathBuf> {
    let model_dir = output_dir.join(local_name(repo));
    std::fs::create_dir_all(&model_dir)?;

    let api = Api::new()?;
    let repo_api = api.model(repo.to_string());

    let mut files: Vec<String> = MODEL_FILES.iter().map(|f| f.to_string()).collect();
    match repo_api.info() {
        Ok(info) => files.extend(
            info.siblings
                .into_iter()
                .map(|s| s.rfilename)
                .filter(|f| f.starts_with("model-") && f.ends_with(".safetensors")),
        ),
        Err(e) => tracing::debug!("Could not list files of {}: {}", repo, e),
    }

    let mut fetched = Vec::new();
    for filename in &files {
        match repo_api.get(filename) {
            Ok(cached_path) => {
                std::fs::copy(&cached_path, model_dir.join(filename))?;
                tracing::info!("Downloaded {}", filename);
                fetched.push(filename.as_str());
            }
            Err(e) => tracing::debug!("Skipping {}: {}", filename, e),
        }
    }

    if !fetched.iter().any(|f| f.ends_with(".safetensors")) {
        return Err(anyhow!(
            "No SafeTensors weights found in {}; use `batchgen pull --file` for GGUF repositories",
            repo
        ));
    }

    Ok(model_dir)
}

/// Download one file of `repo` into `output_dir`
pub fn download_file(repo: &str, filename: &str, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let api = Api::new()?;
    let cached_path = api.model(repo.to_string()).get(filename)?;

    let dest = output_dir.join(filename);
    std::fs::copy(&cached_path, &dest)?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_name() {
        assert_eq!(local_name("openai-community/gpt2"), "gpt2");
        assert_eq!(local_name("gpt2"), "gpt2");
    }

    #[test]
    fn test_resolve_direct_path() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("weights.safetensors");
        std::fs::write(&model, b"").unwrap();

        let resolved = resolve_model(model.to_str().unwrap(), Path::new("/nonexistent")).unwrap();
        assert_eq!(resolved, model);
    }

    #[test]
    fn test_resolve_under_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("gpt2-small")).unwrap();

        let resolved = resolve_model("gpt2-small", dir.path()).unwrap();
        assert_eq!(resolved, dir.path().join("gpt2-small"));
    }

    #[test]
    fn test_resolve_previously_pulled_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("gpt2")).unwrap();

        let resolved = resolve_model("openai-community/gpt2", dir.path()).unwrap();
        assert_eq!(resolved, dir.path().join("gpt2"));
    }
}
