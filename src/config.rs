use clap::Parser;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLASSIFIER_MODEL: &str = "trpakov/vit-face-expression";
pub const DEFAULT_CHAT_MODEL: &str = "Qwen/Qwen2.5-0.5B-Instruct";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Face expression and chat inference gateway")]
pub struct Args {
    #[arg(long, env = "GATEWAY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "GATEWAY_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Never probe for an accelerator
    #[arg(long, env = "GATEWAY_CPU")]
    pub cpu: bool,

    #[arg(long, env = "GATEWAY_DEVICE_ORDINAL", default_value_t = 0)]
    pub device_ordinal: usize,

    #[arg(long, env = "GATEWAY_CLASSIFIER_MODEL", default_value = DEFAULT_CLASSIFIER_MODEL)]
    pub classifier_model: String,

    #[arg(long, env = "GATEWAY_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    #[arg(long, env = "GATEWAY_REVISION", default_value = "main")]
    pub revision: String,

    #[arg(long, env = "HF_TOKEN")]
    pub hf_token: Option<String>,

    /// Load both models before accepting requests
    #[arg(long, env = "GATEWAY_PRELOAD")]
    pub preload: bool,

    #[arg(long, env = "GATEWAY_MAX_UPLOAD_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    #[arg(long, default_value_t = 128)]
    pub max_tokens: usize,

    #[arg(long, default_value_t = 0.7)]
    pub temperature: f64,

    #[arg(long, default_value_t = 0.9)]
    pub top_p: f64,

    #[arg(long, default_value_t = 40)]
    pub top_k: usize,

    #[arg(long, default_value_t = 1.1)]
    pub repeat_penalty: f32,

    /// 0 seeds the sampler from entropy
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

/// Where a pretrained model comes from on the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub model_id: String,
    pub revision: String,
    pub token: Option<String>,
}

impl Args {
    pub fn classifier_source(&self) -> ModelSource {
        ModelSource {
            model_id: self.classifier_model.clone(),
            revision: self.revision.clone(),
            token: self.hf_token.clone(),
        }
    }

    pub fn chat_source(&self) -> ModelSource {
        ModelSource {
            model_id: self.chat_model.clone(),
            revision: self.revision.clone(),
            token: self.hf_token.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: usize,
    pub repeat_penalty: f32,
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 128,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            seed: None,
        }
    }
}

impl From<&Args> for GenerationConfig {
    fn from(args: &Args) -> Self {
        Self {
            max_tokens: args.max_tokens,
            temperature: args.temperature,
            top_p: args.top_p,
            top_k: args.top_k,
            repeat_penalty: args.repeat_penalty,
            seed: if args.seed == 0 { None } else { Some(args.seed) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_public_models() {
        let args = Args::parse_from(["inference-gateway"]);
        assert_eq!(args.port, 8000);
        assert_eq!(args.classifier_source().model_id, DEFAULT_CLASSIFIER_MODEL);
        assert_eq!(args.chat_source().model_id, DEFAULT_CHAT_MODEL);
        assert!(!args.preload);
    }

    #[test]
    fn zero_seed_means_entropy() {
        let args = Args::parse_from(["inference-gateway", "--seed", "0", "--max-tokens", "16"]);
        let config = GenerationConfig::from(&args);
        assert_eq!(config.seed, None);
        assert_eq!(config.max_tokens, 16);

        let args = Args::parse_from(["inference-gateway", "--seed", "42"]);
        assert_eq!(GenerationConfig::from(&args).seed, Some(42));
    }
}
