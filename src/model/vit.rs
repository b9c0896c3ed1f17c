use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use serde::Deserialize;
use tracing::info;

use super::{ClassifierFiles, ClassifierModel};
use crate::error::Result;

/// The subset of a ViT `config.json` that shapes the network.
#[derive(Debug, Clone, Deserialize)]
struct VitConfig {
    hidden_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    intermediate_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    layer_norm_eps: f64,
    #[serde(default = "default_image_size")]
    image_size: usize,
    #[serde(default = "default_patch_size")]
    patch_size: usize,
    #[serde(default = "default_num_channels")]
    num_channels: usize,
    #[serde(default = "default_qkv_bias")]
    qkv_bias: bool,
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_image_size() -> usize {
    224
}

fn default_patch_size() -> usize {
    16
}

fn default_num_channels() -> usize {
    3
}

fn default_qkv_bias() -> bool {
    true
}

impl VitConfig {
    fn into_candle(self) -> vit::Config {
        let mut config = vit::Config::vit_base_patch16_224();
        config.hidden_size = self.hidden_size;
        config.num_hidden_layers = self.num_hidden_layers;
        config.num_attention_heads = self.num_attention_heads;
        config.intermediate_size = self.intermediate_size;
        config.layer_norm_eps = self.layer_norm_eps;
        config.image_size = self.image_size;
        config.patch_size = self.patch_size;
        config.num_channels = self.num_channels;
        config.qkv_bias = self.qkv_bias;
        config
    }
}

/// ViT encoder with a linear classification head.
pub struct VitClassifier {
    model: vit::Model,
}

impl VitClassifier {
    pub fn load(files: &ClassifierFiles, num_labels: usize, device: &Device) -> Result<Self> {
        let config_str = std::fs::read_to_string(&files.config)?;
        let config: VitConfig = serde_json::from_str(&config_str)?;

        info!(
            "ViT config: hidden_size={}, num_layers={}, image_size={}, patch_size={}, labels={}",
            config.hidden_size,
            config.num_hidden_layers,
            config.image_size,
            config.patch_size,
            num_labels
        );

        // Classification heads are small; keep them in f32 everywhere so the
        // softmax sees full-precision logits.
        // SAFETY: hub cache files are not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&files.weights, DType::F32, device)?
        };
        let model = vit::Model::new(&config.into_candle(), num_labels, vb)?;

        info!("ViT classifier loaded");
        Ok(Self { model })
    }
}

impl ClassifierModel for VitClassifier {
    fn forward(&self, pixel_values: &Tensor) -> Result<Tensor> {
        Ok(self.model.forward(pixel_values)?)
    }
}
