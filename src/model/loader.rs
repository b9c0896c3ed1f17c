use std::collections::BTreeSet;
use std::path::PathBuf;

use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use tracing::info;

use crate::config::ModelSource;
use crate::error::{InferenceError, Result};

/// Files backing a causal language model.
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

/// Files backing an image classifier and its preprocessor.
pub struct ClassifierFiles {
    pub config: PathBuf,
    pub preprocessor: PathBuf,
    pub weights: Vec<PathBuf>,
}

fn open_repo(source: &ModelSource) -> Result<ApiRepo> {
    info!(
        "Resolving {} (revision: {})",
        source.model_id, source.revision
    );

    let mut builder = ApiBuilder::new();
    if let Some(token) = &source.token {
        builder = builder.with_token(Some(token.clone()));
    }
    let api = builder
        .build()
        .map_err(|e| InferenceError::Hub(e.to_string()))?;

    Ok(api.repo(Repo::with_revision(
        source.model_id.clone(),
        RepoType::Model,
        source.revision.clone(),
    )))
}

fn fetch(repo: &ApiRepo, filename: &str) -> Result<PathBuf> {
    info!("Downloading {}...", filename);
    repo.get(filename)
        .map_err(|e| InferenceError::Hub(format!("Failed to download {}: {}", filename, e)))
}

/// Download a causal language model from the hub.
pub fn load_model(source: &ModelSource) -> Result<ModelFiles> {
    let repo = open_repo(source)?;
    let config = fetch(&repo, "config.json")?;
    let tokenizer = fetch(&repo, "tokenizer.json")?;
    let weights = download_weights(&repo)?;

    info!(
        "Model files downloaded: config={:?}, tokenizer={:?}, weights={} files",
        config,
        tokenizer,
        weights.len()
    );

    Ok(ModelFiles {
        config,
        tokenizer,
        weights,
    })
}

/// Download an image classifier, its label-bearing config and preprocessor.
pub fn load_classifier(source: &ModelSource) -> Result<ClassifierFiles> {
    let repo = open_repo(source)?;
    let config = fetch(&repo, "config.json")?;
    let preprocessor = fetch(&repo, "preprocessor_config.json")?;
    let weights = download_weights(&repo)?;

    Ok(ClassifierFiles {
        config,
        preprocessor,
        weights,
    })
}

fn download_weights(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    if let Ok(path) = repo.get("model.safetensors") {
        return Ok(vec![path]);
    }

    // Sharded checkpoints list their shards in the index's weight map
    let index = repo.get("model.safetensors.index.json").map_err(|e| {
        InferenceError::Hub(format!(
            "Could not find model weights (tried model.safetensors and a sharded index): {}",
            e
        ))
    })?;
    let shards = shard_names(&std::fs::read_to_string(index)?)?;

    shards.iter().map(|shard| fetch(repo, shard)).collect()
}

fn shard_names(index_json: &str) -> Result<BTreeSet<String>> {
    let index: serde_json::Value = serde_json::from_str(index_json)?;
    let weight_map = index
        .get("weight_map")
        .and_then(|v| v.as_object())
        .ok_or_else(|| InferenceError::ModelLoad("safetensors index has no weight_map".into()))?;

    let shards: BTreeSet<String> = weight_map
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

    if shards.is_empty() {
        return Err(InferenceError::ModelLoad(
            "safetensors index lists no shards".into(),
        ));
    }
    Ok(shards)
}
