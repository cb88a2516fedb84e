//! Generation configuration settings

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for one deployment of the generation loop.
///
/// Fields missing from a JSON document take their defaults, so
/// `{"top_k": 5}` is a complete config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum number of tokens appended to the prompt
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,

    /// Text that ends generation once it shows up in the decoded output
    #[serde(default = "default_end_of_sequence_marker")]
    pub end_of_sequence_marker: String,

    /// Number of highest-scoring candidates the sampler draws from
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Random seed (None = fresh entropy for every call)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_max_output_tokens() -> usize {
    30
}

fn default_end_of_sequence_marker() -> String {
    "</s>".to_string()
}

fn default_top_k() -> usize {
    10
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: default_max_output_tokens(),
            end_of_sequence_marker: default_end_of_sequence_marker(),
            top_k: default_top_k(),
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Load and validate a configuration from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading generation config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing generation config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the loop cannot honour.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_output_tokens >= 1, "max_output_tokens must be at least 1");
        ensure!(self.top_k >= 1, "top_k must be at least 1");
        ensure!(
            !self.end_of_sequence_marker.is_empty(),
            "end_of_sequence_marker must not be empty"
        );
        Ok(())
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: usize) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_end_of_sequence_marker(mut self, marker: impl Into<String>) -> Self {
        self.end_of_sequence_marker = marker.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
