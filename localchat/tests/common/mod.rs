//! Stub capabilities shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use localchat::{LanguageModel, TokenId, Tokenizer};

/// Decodes ids by concatenating fixed text pieces; encodes to `prompt_ids`.
pub struct PieceTokenizer {
    pub pieces: Vec<&'static str>,
    pub special: Vec<TokenId>,
    pub prompt_ids: Vec<TokenId>,
    pub fail_encode: bool,
}

impl PieceTokenizer {
    /// id 0 is a special `<s>` token, the rest are plain text pieces.
    pub fn new(pieces: &[&'static str]) -> Self {
        let mut all = vec!["<s>"];
        all.extend_from_slice(pieces);
        Self {
            pieces: all,
            special: vec![0],
            prompt_ids: vec![0],
            fail_encode: false,
        }
    }
}

impl Tokenizer for PieceTokenizer {
    fn encode(&self, _text: &str, add_special_tokens: bool) -> Result<Vec<TokenId>> {
        if self.fail_encode {
            bail!("vocabulary file is corrupt");
        }
        let mut ids = self.prompt_ids.clone();
        if !add_special_tokens {
            ids.retain(|id| !self.special.contains(id));
        }
        Ok(ids)
    }

    fn decode(&self, tokens: &[TokenId], skip_special_tokens: bool) -> Result<String> {
        let mut text = String::new();
        for id in tokens {
            if skip_special_tokens && self.special.contains(id) {
                continue;
            }
            let piece = self
                .pieces
                .get(*id as usize)
                .ok_or_else(|| anyhow!("unknown id {id}"))?;
            text.push_str(piece);
        }
        Ok(text)
    }
}

/// Emits a one-hot logit vector for the next scripted token on every call.
pub struct ScriptedModel {
    pub vocab_size: usize,
    pub script: Vec<TokenId>,
    /// 1-based call number that fails, if any.
    pub fail_on_call: Option<usize>,
    pub calls: AtomicUsize,
    pub seen_lengths: Mutex<Vec<usize>>,
}

impl ScriptedModel {
    pub fn new(vocab_size: usize, script: &[TokenId]) -> Self {
        Self {
            vocab_size,
            script: script.to_vec(),
            fail_on_call: None,
            calls: AtomicUsize::new(0),
            seen_lengths: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_lengths(&self) -> Vec<usize> {
        self.seen_lengths.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn predict(&self, tokens: &[TokenId]) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen_lengths.lock().unwrap().push(tokens.len());
        if self.fail_on_call == Some(call) {
            bail!("device lost on call {call}");
        }
        let next = self.script[(call - 1) % self.script.len()] as usize;
        let mut logits = vec![0.0; self.vocab_size];
        logits[next] = 10.0;
        Ok(logits)
    }
}
