//! Tokenizer capability and a word-level implementation.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Identifier of a vocabulary entry.
pub type TokenId = u32;

/// Text ↔ token-id conversion used by the generation loop.
pub trait Tokenizer: Send + Sync {
    /// Encode text to token ids, optionally adding model-required special tokens.
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<TokenId>>;

    /// Decode a whole token sequence back to text.
    fn decode(&self, tokens: &[TokenId], skip_special_tokens: bool) -> Result<String>;
}

/// On-disk description of a [`WordTokenizer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Vocabulary, indexed by token id
    pub vocab: Vec<String>,

    /// Token substituted for words missing from the vocabulary
    #[serde(default = "default_unk_token")]
    pub unk_token: String,

    /// Token prepended when special tokens are requested
    #[serde(default)]
    pub bos_token: Option<String>,

    /// Tokens dropped from decoded text when skipping special tokens
    #[serde(default)]
    pub special_tokens: Vec<String>,
}

fn default_unk_token() -> String {
    "<unk>".to_string()
}

/// Whitespace tokenizer backed by a fixed vocabulary.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    vocab: Vec<String>,
    word_to_id: HashMap<String, TokenId>,
    unk_id: TokenId,
    bos_id: Option<TokenId>,
    special: HashSet<TokenId>,
}

impl WordTokenizer {
    /// Build a tokenizer, checking every named token exists in the vocabulary.
    pub fn from_config(config: TokenizerConfig) -> Result<Self> {
        if config.vocab.is_empty() {
            bail!("tokenizer vocabulary is empty");
        }
        let mut word_to_id = HashMap::with_capacity(config.vocab.len());
        for (i, word) in config.vocab.iter().enumerate() {
            let id = TokenId::try_from(i).context("vocabulary too large for u32 token ids")?;
            // first occurrence wins for duplicated words
            word_to_id.entry(word.clone()).or_insert(id);
        }
        let lookup = |word: &str| {
            word_to_id
                .get(word)
                .copied()
                .ok_or_else(|| anyhow!("token {word:?} is not in the vocabulary"))
        };

        let unk_id = lookup(config.unk_token.as_str())?;
        let bos_id = config.bos_token.as_deref().map(lookup).transpose()?;
        let special = config
            .special_tokens
            .iter()
            .map(|word| lookup(word.as_str()))
            .collect::<Result<HashSet<_>>>()?;

        Ok(Self {
            vocab: config.vocab,
            word_to_id,
            unk_id,
            bos_id,
            special,
        })
    }

    /// Load a tokenizer description from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading tokenizer {}", path.display()))?;
        let config: TokenizerConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing tokenizer {}", path.display()))?;
        Self::from_config(config)
    }

    /// Small built-in vocabulary for demos and tests.
    pub fn demo() -> Self {
        Self::from_config(Self::demo_config()).expect("demo vocabulary is consistent")
    }

    pub fn demo_config() -> TokenizerConfig {
        let vocab = [
            "<pad>", "<unk>", "<s>", "</s>", "hello", "world", "how", "are", "you", "i", "am",
            "fine", "what", "is", "your", "name", "my", "assistant", "help", "can", "please",
            "thank", "yes", "no", "the", "and", "a", "to", "of", "in", "that", "have", "it",
            "for", "not", "on", "with", "as", "they", "be", "at", "this", "from", "or", "good",
            "great", "nice", "bad", "ok", "sure", "maybe", "think", "know", "see",
        ];
        TokenizerConfig {
            vocab: vocab.iter().map(|w| w.to_string()).collect(),
            unk_token: "<unk>".to_string(),
            bos_token: Some("<s>".to_string()),
            special_tokens: vec!["<pad>".to_string(), "<s>".to_string()],
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn token_id(&self, word: &str) -> Option<TokenId> {
        self.word_to_id.get(word).copied()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.word_to_id.contains_key(word)
    }

    /// Serialisable description of this tokenizer.
    pub fn to_config(&self) -> TokenizerConfig {
        let name = |id: TokenId| self.vocab[id as usize].clone();
        let mut special_tokens: Vec<TokenId> = self.special.iter().copied().collect();
        special_tokens.sort_unstable();
        TokenizerConfig {
            vocab: self.vocab.clone(),
            unk_token: name(self.unk_id),
            bos_token: self.bos_id.map(name),
            special_tokens: special_tokens.into_iter().map(name).collect(),
        }
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<TokenId>> {
        let mut tokens = Vec::new();
        if add_special_tokens {
            tokens.extend(self.bos_id);
        }
        tokens.extend(
            text.split_whitespace()
                .map(|word| self.token_id(word).unwrap_or(self.unk_id)),
        );
        Ok(tokens)
    }

    fn decode(&self, tokens: &[TokenId], skip_special_tokens: bool) -> Result<String> {
        let mut words = Vec::with_capacity(tokens.len());
        for &id in tokens {
            if skip_special_tokens && self.special.contains(&id) {
                continue;
            }
            let word = self.vocab.get(id as usize).ok_or_else(|| {
                anyhow!("token id {id} is outside the vocabulary of {}", self.vocab.len())
            })?;
            words.push(word.as_str());
        }
        Ok(words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer(words: &[&str]) -> WordTokenizer {
        WordTokenizer::from_config(TokenizerConfig {
            vocab: words.iter().map(|w| w.to_string()).collect(),
            unk_token: "<unk>".into(),
            bos_token: Some("<s>".into()),
            special_tokens: vec!["<s>".into()],
        })
        .unwrap()
    }

    #[test]
    fn encode_adds_bos_only_when_asked() {
        let tok = tokenizer(&["<unk>", "<s>", "hello", "world"]);
        assert_eq!(tok.encode("hello world", true).unwrap(), vec![1, 2, 3]);
        assert_eq!(tok.encode("hello world", false).unwrap(), vec![2, 3]);
    }

    #[test]
    fn unknown_words_map_to_unk() {
        let tok = tokenizer(&["<unk>", "<s>", "foo"]);
        assert_eq!(tok.encode("bar foo", false).unwrap(), vec![0, 2]);
        assert_eq!(tok.decode(&[0], true).unwrap(), "<unk>");
    }

    #[test]
    fn decode_skips_special_tokens_on_request() {
        let tok = tokenizer(&["<unk>", "<s>", "hello", "world"]);
        assert_eq!(tok.decode(&[1, 2, 3], true).unwrap(), "hello world");
        assert_eq!(tok.decode(&[1, 2, 3], false).unwrap(), "<s> hello world");
    }

    #[test]
    fn decode_rejects_out_of_range_ids() {
        let tok = tokenizer(&["<unk>", "<s>"]);
        let err = tok.decode(&[0, 9], true).unwrap_err();
        assert!(err.to_string().contains("outside the vocabulary"));
    }

    #[test]
    fn config_with_missing_unk_is_rejected() {
        let err = WordTokenizer::from_config(TokenizerConfig {
            vocab: vec!["a".into()],
            unk_token: "<unk>".into(),
            bos_token: None,
            special_tokens: vec![],
        })
        .unwrap_err();
        assert!(err.to_string().contains("<unk>"));
    }

    #[test]
    fn demo_keeps_end_marker_visible() {
        let tok = WordTokenizer::demo();
        let eos = tok.token_id("</s>").unwrap();
        let hello = tok.token_id("hello").unwrap();
        let text = tok.decode(&[2, hello, eos], true).unwrap();
        assert_eq!(text, "hello </s>");
        assert!(tok.contains("assistant"));
        assert_eq!(tok.vocab_size(), WordTokenizer::demo_config().vocab.len());
    }

    #[test]
    fn config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        let config = WordTokenizer::demo().to_config();
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = WordTokenizer::from_json(&path).unwrap();
        assert_eq!(loaded.to_config(), config);
    }
}
