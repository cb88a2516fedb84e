use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use localchat::WordTokenizer;
use localchat_mobile::quantize_for_tokenizer;

/// Build the quantized model bundled with the app.
#[derive(Parser)]
#[command(name = "quantize", version, about)]
struct Args {
    /// Output file for the quantized model
    #[arg(long, default_value = "model.q8")]
    out: PathBuf,

    /// Tokenizer JSON the model is sized for (defaults to the demo vocabulary)
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Also write the tokenizer JSON here
    #[arg(long)]
    tokenizer_out: Option<PathBuf>,

    /// Seed for the model weights
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localchat_mobile=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let tokenizer = match &args.tokenizer {
        Some(path) => WordTokenizer::from_json(path)?,
        None => WordTokenizer::demo(),
    };

    let model = quantize_for_tokenizer(&tokenizer, args.seed, &args.out)
        .with_context(|| format!("writing {}", args.out.display()))?;
    tracing::info!(vocab = model.vocab_size(), "saved quantized model to {}", args.out.display());

    if let Some(path) = &args.tokenizer_out {
        let json = serde_json::to_string_pretty(&tokenizer.to_config())?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!("saved tokenizer to {}", path.display());
    }
    Ok(())
}
