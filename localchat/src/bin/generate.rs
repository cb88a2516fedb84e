//! Text generation from the command line.
//!
//! Runs the generation loop against the reference transformer and a
//! word-level tokenizer, printing the same status lines an on-screen
//! caller would display. With `--interactive` every line read from stdin
//! is an independent prompt.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use localchat::{GenerationConfig, GenerationResult, Generator, ModelArgs, Transformer, WordTokenizer};

#[derive(Parser, Debug)]
#[command(name = "generate", version, about)]
struct Args {
    /// Prompt to complete (ignored with --interactive)
    prompt: Option<String>,

    /// Generation config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tokenizer JSON (defaults to the built-in demo vocabulary)
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Maximum tokens to append
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Number of candidates to sample from
    #[arg(long)]
    top_k: Option<usize>,

    /// End-of-sequence marker
    #[arg(long)]
    eos: Option<String>,

    /// Sampling seed
    #[arg(long)]
    seed: Option<u64>,

    /// Seed for the model weights
    #[arg(long, default_value_t = 0)]
    model_seed: u64,

    /// Read prompts from stdin, one per line
    #[arg(long)]
    interactive: bool,
}

impl Args {
    fn generation_config(&self) -> Result<GenerationConfig> {
        let mut config = match &self.config {
            Some(path) => GenerationConfig::from_json(path)?,
            None => GenerationConfig::default(),
        };
        if let Some(max_tokens) = self.max_tokens {
            config = config.with_max_output_tokens(max_tokens);
        }
        if let Some(top_k) = self.top_k {
            config = config.with_top_k(top_k);
        }
        if let Some(eos) = &self.eos {
            config = config.with_end_of_sequence_marker(eos.clone());
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        config.validate()?;
        Ok(config)
    }
}

fn run_prompt(generator: &Generator, prompt: &str) -> GenerationResult {
    generator.generate_with(prompt, |status| println!("{status}"))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localchat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let config = args.generation_config()?;

    let tokenizer = match &args.tokenizer {
        Some(path) => WordTokenizer::from_json(path)?,
        None => WordTokenizer::demo(),
    };
    let model = Transformer::new(ModelArgs {
        seed: args.model_seed,
        ..ModelArgs::for_vocab(tokenizer.vocab_size())
    });
    let generator = Generator::new(config)
        .with_tokenizer(Arc::new(tokenizer))
        .with_model(Arc::new(model));

    if !args.interactive {
        let prompt = args.prompt.as_deref().unwrap_or_default();
        run_prompt(&generator, prompt)?;
        return Ok(());
    }

    let stdin = io::stdin();
    let mut input = String::new();
    loop {
        print!(">>> ");
        io::stdout().flush()?;
        input.clear();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let prompt = input.trim();
        if prompt == "/exit" {
            break;
        }
        if prompt.is_empty() {
            continue;
        }
        // the status line already reported a failure; keep the session open
        if let Err(err) = run_prompt(&generator, prompt) {
            tracing::debug!(kind = ?err.kind(), "generation failed");
        }
    }
    Ok(())
}
