use super::ModelArchitecture;
use crate::tokenizer::TokenizerWrapper;

/// Single-turn prompt formatting for each supported architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `[INST] ... [/INST]`
    Mistral,
    /// `<start_of_turn>user ... <start_of_turn>model`
    Gemma,
    /// ChatML
    ChatMl,
}

impl ChatTemplate {
    pub fn for_architecture(architecture: ModelArchitecture) -> Self {
        match architecture {
            ModelArchitecture::Mistral => ChatTemplate::Mistral,
            ModelArchitecture::Gemma2 => ChatTemplate::Gemma,
            ModelArchitecture::Qwen2 => ChatTemplate::ChatMl,
        }
    }

    /// Wrap `prompt` as the only user turn and open the assistant turn.
    pub fn format(&self, prompt: &str) -> String {
        match self {
            ChatTemplate::Mistral => format!("[INST] {} [/INST]", prompt),
            ChatTemplate::Gemma => format!(
                "<start_of_turn>user\n{}<end_of_turn>\n<start_of_turn>model\n",
                prompt
            ),
            ChatTemplate::ChatMl => format!(
                "<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n",
                prompt
            ),
        }
    }

    fn stop_strings(&self) -> &'static [&'static str] {
        match self {
            ChatTemplate::Mistral => &["</s>"],
            ChatTemplate::Gemma => &["<end_of_turn>", "<eos>"],
            ChatTemplate::ChatMl => &["<|im_end|>", "<|endoftext|>"],
        }
    }

    /// Token ids that close the assistant turn, as known to `tokenizer`.
    pub fn stop_tokens(&self, tokenizer: &TokenizerWrapper) -> Vec<u32> {
        self.stop_strings()
            .iter()
            .filter_map(|s| tokenizer.token_id(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tests::TINY_TOKENIZER;

    #[test]
    fn formats_a_single_user_turn() {
        assert_eq!(
            ChatTemplate::Mistral.format("Hi"),
            "[INST] Hi [/INST]"
        );
        assert_eq!(
            ChatTemplate::ChatMl.format("Hello, how are you?"),
            "<|im_start|>user\nHello, how are you?<|im_end|>\n<|im_start|>assistant\n"
        );
        assert!(ChatTemplate::Gemma
            .format("Hi")
            .ends_with("<start_of_turn>model\n"));
    }

    #[test]
    fn resolves_only_known_stop_tokens() {
        let tokenizer = TokenizerWrapper::from_bytes(TINY_TOKENIZER).unwrap();
        assert_eq!(ChatTemplate::ChatMl.stop_tokens(&tokenizer), vec![4]);
        assert!(ChatTemplate::Gemma.stop_tokens(&tokenizer).is_empty());
    }

    #[test]
    fn maps_architectures() {
        assert_eq!(
            ChatTemplate::for_architecture(ModelArchitecture::Qwen2),
            ChatTemplate::ChatMl
        );
        assert_eq!(
            ChatTemplate::for_architecture(ModelArchitecture::Gemma2),
            ChatTemplate::Gemma
        );
    }
}
