mod gemma2;
mod labels;
mod loader;
mod mistral;
mod qwen2;
mod template;
mod vit;

pub use gemma2::Gemma2Model;
pub use labels::LabelMap;
pub use loader::{load_classifier, load_model, ClassifierFiles, ModelFiles};
pub use mistral::MistralModel;
pub use qwen2::Qwen2Model;
pub use template::ChatTemplate;
pub use vit::VitClassifier;

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::info;

use crate::error::Result;

/// Trait for language models that can generate next token logits
pub trait LanguageModel: Send + Sync {
    /// Forward pass to get logits for the next token
    fn forward(&mut self, input_ids: &Tensor, position: usize) -> Result<Tensor>;

    /// Reset the model's KV cache
    fn reset_cache(&mut self);

    /// Get the end-of-sequence token ID
    fn eos_token_id(&self) -> u32;
}

/// Trait for image classifiers producing per-class logits.
pub trait ClassifierModel: Send + Sync {
    /// `pixel_values` is `(batch, channels, height, width)`; the result is
    /// `(batch, num_labels)`.
    fn forward(&self, pixel_values: &Tensor) -> Result<Tensor>;
}

/// Supported causal language model architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelArchitecture {
    Mistral,
    Gemma2,
    Qwen2,
}

impl ModelArchitecture {
    fn from_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.contains("gemma2") {
            Some(ModelArchitecture::Gemma2)
        } else if name.contains("qwen2") {
            Some(ModelArchitecture::Qwen2)
        } else if name.contains("mistral") {
            Some(ModelArchitecture::Mistral)
        } else {
            None
        }
    }
}

/// Detect model architecture from the contents of config.json
pub fn detect_architecture(config_json: &str) -> Result<ModelArchitecture> {
    let config: serde_json::Value = serde_json::from_str(config_json)?;

    let from_architectures = config
        .get("architectures")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|arch| arch.as_str())
        .find_map(ModelArchitecture::from_name);

    let from_model_type = || {
        config
            .get("model_type")
            .and_then(|v| v.as_str())
            .and_then(ModelArchitecture::from_name)
    };

    Ok(from_architectures
        .or_else(from_model_type)
        .unwrap_or(ModelArchitecture::Mistral))
}

/// Read `eos_token_id` from a model config, accepting a scalar or a list.
pub(crate) fn eos_from_config(config_json: &str, fallback: u32) -> Result<u32> {
    let config: serde_json::Value = serde_json::from_str(config_json)?;
    let eos = config.get("eos_token_id").and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_array().and_then(|arr| arr.first()?.as_u64()))
    });
    Ok(eos.map(|id| id as u32).unwrap_or(fallback))
}

pub(crate) fn build_var_builder(weights: &[PathBuf], device: &Device) -> Result<VarBuilder<'static>> {
    let dtype = if device.is_cuda() {
        DType::BF16
    } else {
        DType::F32
    };

    info!("Mapping {} weight file(s) as {:?}", weights.len(), dtype);
    // SAFETY: the safetensors files live in the hub cache and are not
    // modified while mapped.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(weights, dtype, device)? };
    Ok(vb)
}

/// Load the causal language model described by `files` onto `device`.
pub fn load_language_model(
    files: &ModelFiles,
    device: &Device,
) -> Result<(Box<dyn LanguageModel>, ModelArchitecture)> {
    let architecture = detect_architecture(&std::fs::read_to_string(&files.config)?)?;
    info!("Detected architecture: {:?}", architecture);

    let model: Box<dyn LanguageModel> = match architecture {
        ModelArchitecture::Mistral => Box::new(MistralModel::load(files, device)?),
        ModelArchitecture::Gemma2 => Box::new(Gemma2Model::load(files, device)?),
        ModelArchitecture::Qwen2 => Box::new(Qwen2Model::load(files, device)?),
    };

    Ok((model, architecture))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_from_architectures_list() {
        let config = r#"{"architectures": ["Qwen2ForCausalLM"], "model_type": "qwen2"}"#;
        assert_eq!(detect_architecture(config).unwrap(), ModelArchitecture::Qwen2);

        let config = r#"{"architectures": ["Gemma2ForCausalLM"]}"#;
        assert_eq!(detect_architecture(config).unwrap(), ModelArchitecture::Gemma2);
    }

    #[test]
    fn falls_back_to_model_type_then_mistral() {
        let config = r#"{"model_type": "gemma2"}"#;
        assert_eq!(detect_architecture(config).unwrap(), ModelArchitecture::Gemma2);

        let config = r#"{"architectures": ["SomethingElse"]}"#;
        assert_eq!(detect_architecture(config).unwrap(), ModelArchitecture::Mistral);
    }

    #[test]
    fn reads_scalar_or_list_eos() {
        assert_eq!(eos_from_config(r#"{"eos_token_id": 7}"#, 0).unwrap(), 7);
        assert_eq!(eos_from_config(r#"{"eos_token_id": [1, 107]}"#, 0).unwrap(), 1);
        assert_eq!(eos_from_config("{}", 2).unwrap(), 2);
    }
}
