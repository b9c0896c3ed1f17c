use std::time::Instant;

use candle_core::{Device, Tensor};
use tracing::{debug, info};

use crate::config::GenerationConfig;
use crate::error::{InferenceError, Result};
use crate::model::LanguageModel;
use crate::sampling::{apply_repeat_penalty, Sampler};
use crate::tokenizer::TokenizerWrapper;

pub struct GenerationOutput {
    pub text: String,
    pub tokens: Vec<u32>,
}

pub struct TextGenerator<'a> {
    model: &'a mut dyn LanguageModel,
    tokenizer: &'a TokenizerWrapper,
    device: &'a Device,
    stop_tokens: Vec<u32>,
}

impl<'a> TextGenerator<'a> {
    pub fn new(
        model: &'a mut dyn LanguageModel,
        tokenizer: &'a TokenizerWrapper,
        device: &'a Device,
    ) -> Self {
        let mut stop_tokens = vec![model.eos_token_id()];
        stop_tokens.extend(tokenizer.eos_token_id());
        Self {
            model,
            tokenizer,
            device,
            stop_tokens,
        }
    }

    /// Additional token ids that end a turn (chat template terminators).
    pub fn with_stop_tokens(mut self, tokens: impl IntoIterator<Item = u32>) -> Self {
        self.stop_tokens.extend(tokens);
        self
    }

    pub fn generate(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<GenerationOutput> {
        let start_time = Instant::now();

        self.model.reset_cache();

        let prompt_tokens = self.tokenizer.encode(prompt)?;
        let prompt_len = prompt_tokens.len();
        debug!("Prompt tokens: {}", prompt_len);

        if prompt_tokens.is_empty() {
            return Err(InferenceError::Generation("Empty prompt".to_string()));
        }

        let mut sampler = Sampler::new(
            config.temperature,
            config.top_p,
            config.top_k,
            config.seed,
        );

        let mut all_tokens = prompt_tokens.clone();
        let mut generated_tokens: Vec<u32> = Vec::new();

        // Prefill
        let input_tensor = Tensor::new(prompt_tokens.as_slice(), self.device)?.unsqueeze(0)?;
        let mut logits = self.model.forward(&input_tensor, 0)?;

        let generation_start = Instant::now();

        for i in 0..config.max_tokens {
            let penalized_logits =
                apply_repeat_penalty(&logits, config.repeat_penalty, &all_tokens)?;

            let next_token = sampler.sample(&penalized_logits)?;

            if self.stop_tokens.contains(&next_token) {
                debug!("Stop token {} generated at position {}", next_token, i);
                break;
            }

            generated_tokens.push(next_token);
            all_tokens.push(next_token);

            let input = Tensor::new(&[next_token], self.device)?.unsqueeze(0)?;
            logits = self.model.forward(&input, prompt_len + i)?;
        }

        let generation_time = generation_start.elapsed();
        let total_time = start_time.elapsed();

        let tokens_per_second = if generation_time.as_secs_f64() > 0.0 {
            generated_tokens.len() as f64 / generation_time.as_secs_f64()
        } else {
            0.0
        };

        let output_text = self.tokenizer.decode(&generated_tokens)?;

        info!(
            "Generated {} tokens in {:?} ({:.2} tokens/sec, {:?} including prefill)",
            generated_tokens.len(),
            generation_time,
            tokens_per_second,
            total_time
        );

        Ok(GenerationOutput {
            text: output_text,
            tokens: generated_tokens,
        })
    }
}
