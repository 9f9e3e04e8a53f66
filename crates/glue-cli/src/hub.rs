//! Pretrained model resolution from the Hugging Face Hub or local files

use anyhow::{Context, Result};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
}

impl ModelFiles {
    fn in_dir(dir: &Path) -> Self {
        Self {
            config: dir.join(CONFIG_FILE),
            weights: dir.join(WEIGHTS_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
        }
    }
}

/// Locate config, encoder weights and tokenizer for a model.
///
/// Examples:
/// - `resolve_model("bert-base-uncased")` -> downloads from the hub (cached)
/// - `resolve_model("./bert-base-cased")` -> uses a local directory
pub fn resolve_model(name: &str) -> Result<ModelFiles> {
    let path = Path::new(name);
    if path.is_dir() {
        tracing::info!("Loading model files from local directory: {}", name);
        let files = ModelFiles::in_dir(path);
        for file in [&files.config, &files.weights, &files.tokenizer] {
            if !file.is_file() {
                anyhow::bail!("Missing {} in model directory {}", file.display(), name);
            }
        }
        return Ok(files);
    }

    tracing::info!("Fetching model files: {} ...", name);
    let api = Api::new().context("Failed to initialize HuggingFace Hub API")?;
    let repo = api.repo(Repo::new(name.to_string(), RepoType::Model));
    let fetch = |file: &str| {
        repo.get(file)
            .with_context(|| format!("Failed to download {} from {}", file, name))
    };

    Ok(ModelFiles {
        config: fetch(CONFIG_FILE)?,
        weights: fetch(WEIGHTS_FILE)?,
        tokenizer: fetch(TOKENIZER_FILE)?,
    })
}

pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    let tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;
    tracing::info!(
        "Tokenizer loaded: {} (vocab size: {})",
        path.display(),
        tokenizer.get_vocab_size(true)
    );
    Ok(tokenizer)
}
