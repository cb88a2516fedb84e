//! Minimal interactive text generation.
//!
//! A prompt is tokenized, a causal language model predicts next-token logits,
//! top-k sampling picks a token, and the growing sequence is decoded until an
//! end-of-sequence marker appears or the token budget is spent.
//!
//! The tokenizer and model are capabilities injected into a [`Generator`]:
//! anything implementing [`Tokenizer`] and [`LanguageModel`] can drive it.

pub mod config;
pub mod error;
pub mod generation;
pub mod model;
pub mod sampler;
pub mod tokenizer;

pub use config::GenerationConfig;
pub use error::{ErrorKind, GenerationError};
pub use generation::{Generation, GenerationHandle, GenerationResult, Generator, Status, StopReason};
pub use model::{LanguageModel, ModelArgs, Transformer};
pub use sampler::{sample_top_k, sample_top_k_with_draw, top_k_candidates, TopKCandidate, TopKSampler};
pub use tokenizer::{TokenId, Tokenizer, TokenizerConfig, WordTokenizer};
