use std::sync::{Mutex, PoisonError};

use candle_core::Device;
use tracing::info;

use crate::config::{GenerationConfig, ModelSource};
use crate::error::{InferenceError, Result};
use crate::generation::TextGenerator;
use crate::model::{load_language_model, load_model, ChatTemplate, LanguageModel};
use crate::registry::{run_blocking, ModelRegistry};
use crate::tokenizer::TokenizerWrapper;

/// A resident causal LM that answers one prompt at a time.
///
/// Decoding mutates the KV cache, so the model sits behind a mutex; every
/// call clears the cache first and no history survives between calls.
pub struct ChatPipeline {
    model: Mutex<Box<dyn LanguageModel>>,
    tokenizer: TokenizerWrapper,
    template: ChatTemplate,
    generation: GenerationConfig,
    device: Device,
}

impl ChatPipeline {
    pub fn new(
        model: Box<dyn LanguageModel>,
        tokenizer: TokenizerWrapper,
        template: ChatTemplate,
        generation: GenerationConfig,
        device: Device,
    ) -> Self {
        Self {
            model: Mutex::new(model),
            tokenizer,
            template,
            generation,
            device,
        }
    }

    pub fn load(source: &ModelSource, generation: GenerationConfig, device: &Device) -> Result<Self> {
        let files = load_model(source)?;
        let tokenizer = TokenizerWrapper::load(&files.tokenizer)?;
        let (model, architecture) = load_language_model(&files, device)?;

        info!(
            "Chat model {} ready ({:?}, vocabulary {})",
            source.model_id,
            architecture,
            tokenizer.vocab_size()
        );
        Ok(Self::new(
            model,
            tokenizer,
            ChatTemplate::for_architecture(architecture),
            generation,
            device.clone(),
        ))
    }

    pub fn reply(&self, prompt: &str) -> Result<String> {
        let formatted = self.template.format(prompt);
        let stop_tokens = self.template.stop_tokens(&self.tokenizer);

        // A panicked turn leaves no state behind: generation resets the cache.
        let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        let mut generator = TextGenerator::new(model.as_mut(), &self.tokenizer, &self.device)
            .with_stop_tokens(stop_tokens);
        let output = generator.generate(&formatted, &self.generation)?;

        let reply = output.text.trim();
        if reply.is_empty() {
            return Err(InferenceError::Generation(
                "model produced an empty reply".into(),
            ));
        }
        Ok(reply.to_string())
    }
}

/// Make sure the chat model is resident and answer `prompt` as a single turn.
pub async fn respond(registry: &ModelRegistry, prompt: String) -> Result<String> {
    let pipeline = registry.chat().await?;
    run_blocking(move || pipeline.reply(&prompt)).await
}

#[cfg(test)]
pub(crate) mod tests {
    use candle_core::Tensor;

    use super::*;
    use crate::generation::tests::ScriptedModel;
    use crate::tokenizer::tests::TINY_TOKENIZER;

    pub(crate) fn scripted_pipeline(script: Vec<u32>) -> ChatPipeline {
        ChatPipeline::new(
            Box::new(ScriptedModel::new(script, 2)),
            TokenizerWrapper::from_bytes(TINY_TOKENIZER).unwrap(),
            ChatTemplate::ChatMl,
            GenerationConfig {
                temperature: 0.0,
                ..GenerationConfig::default()
            },
            Device::Cpu,
        )
    }

    #[test]
    fn replies_with_generated_text() {
        let pipeline = scripted_pipeline(vec![1, 3]);
        assert_eq!(pipeline.reply("Hello, how are you?").unwrap(), "hello there");
    }

    #[test]
    fn template_stop_token_ends_the_turn() {
        let pipeline = scripted_pipeline(vec![1, 4, 3]);
        assert_eq!(pipeline.reply("Hi").unwrap(), "hello");
    }

    #[test]
    fn each_call_is_independent() {
        let pipeline = scripted_pipeline(vec![3]);
        let first = pipeline.reply("Hi").unwrap();
        let second = pipeline.reply("Hi again").unwrap();
        assert_eq!(first, second);
    }

    /// Panics on its first forward pass, then behaves like `ScriptedModel`.
    struct PanicsOnce {
        inner: ScriptedModel,
        panicked: bool,
    }

    impl LanguageModel for PanicsOnce {
        fn forward(&mut self, input_ids: &Tensor, position: usize) -> Result<Tensor> {
            if !self.panicked {
                self.panicked = true;
                panic!("kernel fault");
            }
            self.inner.forward(input_ids, position)
        }

        fn reset_cache(&mut self) {
            self.inner.reset_cache();
        }

        fn eos_token_id(&self) -> u32 {
            self.inner.eos_token_id()
        }
    }

    #[test]
    fn recovers_after_a_panicked_turn() {
        let pipeline = ChatPipeline::new(
            Box::new(PanicsOnce {
                inner: ScriptedModel::new(vec![1, 3], 2),
                panicked: false,
            }),
            TokenizerWrapper::from_bytes(TINY_TOKENIZER).unwrap(),
            ChatTemplate::ChatMl,
            GenerationConfig {
                temperature: 0.0,
                ..GenerationConfig::default()
            },
            Device::Cpu,
        );

        let crashed =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pipeline.reply("Hi")));
        assert!(crashed.is_err());
        assert!(pipeline.model.is_poisoned());

        assert_eq!(pipeline.reply("Hi again").unwrap(), "hello there");
    }

    #[test]
    fn empty_generation_is_an_error() {
        let pipeline = scripted_pipeline(vec![]);
        let err = pipeline.reply("Hi").unwrap_err();
        assert!(matches!(err, InferenceError::Generation(_)));
    }
}
