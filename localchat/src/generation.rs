//! The autoregressive generation loop.
//!
//! A [`Generator`] turns a prompt into text by repeatedly asking the model for
//! next-token logits, drawing a token with top-k sampling and re-decoding the
//! whole sequence until the end-of-sequence marker shows up or the token
//! budget runs out.
//!
//! Every call reports its progress through a status callback: one
//! [`Status::Generating`] followed by exactly one terminal status.

use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::model::LanguageModel;
use crate::sampler::TopKSampler;
use crate::tokenizer::{TokenId, Tokenizer};

/// Progress notification emitted during a generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// The call has started.
    Generating,
    /// The call succeeded with this text.
    Finished(String),
    /// The call failed.
    Failed(GenerationError),
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Generating)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Generating => f.write_str("Generating..."),
            Status::Finished(text) => f.write_str(text),
            Status::Failed(err) => write!(f, "{err}"),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The decoded text contained the end-of-sequence marker.
    EndOfSequence,
    /// `max_output_tokens` tokens were appended.
    TokenBudget,
}

/// Success payload of a generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Decoded text, cut before the end-of-sequence marker if it appeared.
    pub text: String,
    /// Prompt tokens followed by every sampled token.
    pub tokens: Vec<TokenId>,
    /// Number of tokens the encoded prompt contributed.
    pub prompt_len: usize,
    pub stop_reason: StopReason,
}

impl Generation {
    pub fn generated_tokens(&self) -> usize {
        self.tokens.len() - self.prompt_len
    }
}

pub type GenerationResult = std::result::Result<Generation, GenerationError>;

/// Runs generation calls against injected tokenizer and model capabilities.
///
/// Cloning shares the capabilities. Calls never share a token sequence, so
/// one generator may serve several threads at once.
#[derive(Clone)]
pub struct Generator {
    tokenizer: Option<Arc<dyn Tokenizer>>,
    model: Option<Arc<dyn LanguageModel>>,
    config: GenerationConfig,
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("tokenizer", &self.tokenizer.is_some())
            .field("model", &self.model.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl Generator {
    /// A generator with no capabilities attached yet.
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            tokenizer: None,
            model: None,
            config,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Whether both capabilities are attached.
    pub fn is_ready(&self) -> bool {
        self.tokenizer.is_some() && self.model.is_some()
    }

    /// Generate without observing status updates.
    pub fn generate(&self, prompt: &str) -> GenerationResult {
        self.generate_with(prompt, |_| {})
    }

    /// Generate, reporting progress to `on_status`.
    ///
    /// Randomness comes from `config.seed` when set, otherwise from OS entropy.
    pub fn generate_with<F>(&self, prompt: &str, on_status: F) -> GenerationResult
    where
        F: FnMut(Status),
    {
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.generate_with_rng(prompt, rng, on_status)
    }

    /// Generate using an injected randomness source.
    pub fn generate_with_rng<R, F>(&self, prompt: &str, rng: R, mut on_status: F) -> GenerationResult
    where
        R: Rng,
        F: FnMut(Status),
    {
        on_status(Status::Generating);
        let result = self.run(prompt, rng);
        match &result {
            Ok(generation) => {
                tracing::info!(
                    generated = generation.generated_tokens(),
                    stop_reason = ?generation.stop_reason,
                    "generation finished"
                );
                on_status(Status::Finished(generation.text.clone()));
            }
            Err(err) => {
                tracing::warn!(kind = ?err.kind(), "generation failed: {err}");
                on_status(Status::Failed(err.clone()));
            }
        }
        result
    }

    /// Run a call on a background thread.
    pub fn spawn(&self, prompt: impl Into<String>) -> GenerationHandle {
        let generator = self.clone();
        let prompt = prompt.into();
        let (tx, rx) = mpsc::channel();
        let thread = std::thread::spawn(move || {
            generator.generate_with(&prompt, |status| {
                // the receiver may have been dropped by an uninterested caller
                let _ = tx.send(status);
            })
        });
        GenerationHandle { statuses: rx, thread }
    }

    fn run<R: Rng>(&self, prompt: &str, rng: R) -> GenerationResult {
        let (tokenizer, model) = match (&self.tokenizer, &self.model) {
            (Some(tokenizer), Some(model)) => (tokenizer, model),
            (None, Some(_)) => {
                return Err(GenerationError::ResourceUnavailable("tokenizer is not loaded".into()))
            }
            (Some(_), None) => {
                return Err(GenerationError::ResourceUnavailable("model is not loaded".into()))
            }
            (None, None) => {
                return Err(GenerationError::ResourceUnavailable(
                    "model and tokenizer are not loaded".into(),
                ))
            }
        };

        let marker = self.config.end_of_sequence_marker.as_str();
        let mut sampler = TopKSampler::new(self.config.top_k, rng);
        let mut tokens = tokenizer
            .encode(prompt, true)
            .map_err(GenerationError::inference)?;
        let prompt_len = tokens.len();
        tracing::info!(
            prompt_tokens = prompt_len,
            max_output_tokens = self.config.max_output_tokens,
            top_k = self.config.top_k,
            "starting generation"
        );

        let mut text = String::new();
        for step in 0..self.config.max_output_tokens {
            let logits = model.predict(&tokens).map_err(GenerationError::inference)?;
            let next = sampler.sample(&logits);
            let next = TokenId::try_from(next).map_err(|_| {
                GenerationError::InferenceFailed(format!(
                    "sampled index {next} does not fit a token id"
                ))
            })?;
            tokens.push(next);
            tracing::debug!(step = step + 1, token = next, "sampled token");

            text = tokenizer
                .decode(&tokens, true)
                .map_err(GenerationError::inference)?;
            if let Some(end) = text.find(marker) {
                text.truncate(end);
                return Ok(Generation {
                    text,
                    tokens,
                    prompt_len,
                    stop_reason: StopReason::EndOfSequence,
                });
            }
        }

        // a zero budget never decodes inside the loop
        if tokens.len() == prompt_len {
            text = tokenizer
                .decode(&tokens, true)
                .map_err(GenerationError::inference)?;
        }
        Ok(Generation {
            text,
            tokens,
            prompt_len,
            stop_reason: StopReason::TokenBudget,
        })
    }
}

/// A generation call running on a background thread.
pub struct GenerationHandle {
    statuses: Receiver<Status>,
    thread: JoinHandle<GenerationResult>,
}

impl GenerationHandle {
    /// Status updates in emission order; the channel closes after the terminal one.
    pub fn statuses(&self) -> &Receiver<Status> {
        &self.statuses
    }

    /// Wait for the call to finish.
    pub fn join(self) -> GenerationResult {
        self.thread.join().unwrap_or_else(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "generation thread panicked".to_string());
            Err(GenerationError::InferenceFailed(reason))
        })
    }
}
