use candle_core::{Device, Tensor};
use candle_transformers::models::gemma2::{Config, Model};
use tracing::info;

use super::{build_var_builder, LanguageModel, ModelFiles};
use crate::error::Result;

pub struct Gemma2Model {
    model: Model,
    eos_token_id: u32,
}

impl Gemma2Model {
    pub fn load(files: &ModelFiles, device: &Device) -> Result<Self> {
        let config_str = std::fs::read_to_string(&files.config)?;
        let config: Config = serde_json::from_str(&config_str)?;
        let eos_token_id = super::eos_from_config(&config_str, 1)?;

        info!(
            "Gemma2 config: vocab_size={}, hidden_size={}, num_layers={}, num_heads={}",
            config.vocab_size,
            config.hidden_size,
            config.num_hidden_layers,
            config.num_attention_heads
        );

        let vb = build_var_builder(&files.weights, device)?;
        let model = Model::new(false, &config, vb)?;

        info!("Gemma2 model loaded");
        Ok(Self {
            model,
            eos_token_id,
        })
    }
}

impl LanguageModel for Gemma2Model {
    fn forward(&mut self, input_ids: &Tensor, position: usize) -> Result<Tensor> {
        Ok(self.model.forward(input_ids, position)?)
    }

    fn reset_cache(&mut self) {
        self.model.clear_kv_cache();
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}
