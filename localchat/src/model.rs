//! Model inference capability and a small reference transformer.

use anyhow::{bail, Result};
use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::tokenizer::TokenId;

/// One forward pass from a token sequence to next-token logits.
///
/// The returned vector has one score per vocabulary entry. Implementations
/// hold no per-call state, so a single model can serve concurrent calls.
pub trait LanguageModel: Send + Sync {
    fn predict(&self, tokens: &[TokenId]) -> Result<Vec<f32>>;
}

/// Configuration for the transformer model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelArgs {
    /// Number of trailing tokens the model attends over.
    pub max_seq_len: usize,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Embedding/hidden dimension.
    pub dim: usize,
    /// Hidden dimension of the feed-forward network.
    pub hidden_dim: usize,
    /// Number of layers.
    pub n_layers: usize,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl Default for ModelArgs {
    fn default() -> Self {
        Self {
            max_seq_len: 128,
            vocab_size: 1024,
            dim: 64,
            hidden_dim: 256,
            n_layers: 2,
            seed: 0,
        }
    }
}

impl ModelArgs {
    /// Default architecture sized for a given vocabulary.
    pub fn for_vocab(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            ..Self::default()
        }
    }
}

fn init_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-0.1..0.1))
}

/// Embedding layer mapping token ids to vectors.
pub struct Embedding {
    weight: Array2<f32>, // vocab_size x dim
}

impl Embedding {
    fn new(rng: &mut StdRng, vocab_size: usize, dim: usize) -> Self {
        Self {
            weight: init_matrix(rng, vocab_size, dim),
        }
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    /// # Panics
    /// If a token is outside the vocabulary.
    pub fn forward(&self, tokens: &[usize]) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((tokens.len(), self.weight.ncols()));
        for (mut row, &tok) in out.axis_iter_mut(Axis(0)).zip(tokens) {
            row.assign(&self.weight.row(tok));
        }
        out
    }
}

/// Fully connected layer.
pub struct Linear {
    weight: Array2<f32>, // out x in
    bias: Option<Array1<f32>>,
}

impl Linear {
    fn new(rng: &mut StdRng, in_features: usize, out_features: usize, bias: bool) -> Self {
        let weight = init_matrix(rng, out_features, in_features);
        let bias = bias.then(|| Array1::from_shape_fn(out_features, |_| rng.gen_range(-0.1..0.1)));
        Self { weight, bias }
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Array1<f32>> {
        self.bias.as_ref()
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut y = x.dot(&self.weight.t());
        if let Some(b) = &self.bias {
            y += &b.view().insert_axis(Axis(0));
        }
        y
    }
}

struct RmsNorm {
    weight: Array1<f32>,
    eps: f32,
}

impl RmsNorm {
    fn new(dim: usize) -> Self {
        Self {
            weight: Array1::ones(dim),
            eps: 1e-6,
        }
    }

    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let dim = x.ncols().max(1) as f32;
        let mean_sq = x.mapv(|v| v * v).sum_axis(Axis(1)) / dim;
        let denom = mean_sq.mapv(|m| (m + self.eps).sqrt()).insert_axis(Axis(1));
        (x / &denom) * &self.weight.view().insert_axis(Axis(0))
    }
}

/// Single-head self attention; position i only sees positions 0..=i.
struct CausalSelfAttention {
    wq: Linear,
    wk: Linear,
    wv: Linear,
    wo: Linear,
    scale: f32,
}

impl CausalSelfAttention {
    fn new(rng: &mut StdRng, dim: usize) -> Self {
        Self {
            wq: Linear::new(rng, dim, dim, false),
            wk: Linear::new(rng, dim, dim, false),
            wv: Linear::new(rng, dim, dim, false),
            wo: Linear::new(rng, dim, dim, false),
            scale: 1.0 / (dim.max(1) as f32).sqrt(),
        }
    }

    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let q = self.wq.forward(x);
        let k = self.wk.forward(x);
        let v = self.wv.forward(x);

        let mut scores = q.dot(&k.t()) * self.scale;
        for (i, mut row) in scores.axis_iter_mut(Axis(0)).enumerate() {
            row.slice_mut(s![i + 1..]).fill(f32::NEG_INFINITY);
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        self.wo.forward(&scores.dot(&v))
    }
}

/// Feed-forward network using SiLU activation.
struct FeedForward {
    up: Linear,
    down: Linear,
}

impl FeedForward {
    fn new(rng: &mut StdRng, dim: usize, hidden_dim: usize) -> Self {
        Self {
            up: Linear::new(rng, dim, hidden_dim, false),
            down: Linear::new(rng, hidden_dim, dim, false),
        }
    }

    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let hidden = self.up.forward(x).mapv(|v| v / (1.0 + (-v).exp()));
        self.down.forward(&hidden)
    }
}

struct Block {
    attn_norm: RmsNorm,
    attn: CausalSelfAttention,
    ffn_norm: RmsNorm,
    ffn: FeedForward,
}

impl Block {
    fn new(rng: &mut StdRng, args: &ModelArgs) -> Self {
        Self {
            attn_norm: RmsNorm::new(args.dim),
            attn: CausalSelfAttention::new(rng, args.dim),
            ffn_norm: RmsNorm::new(args.dim),
            ffn: FeedForward::new(rng, args.dim, args.hidden_dim),
        }
    }

    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let x = x + &self.attn.forward(&self.attn_norm.forward(x));
        let h = self.ffn.forward(&self.ffn_norm.forward(&x));
        x + &h
    }
}

/// Decoder-only transformer with seeded random weights.
///
/// Building twice from equal [`ModelArgs`] yields identical weights.
pub struct Transformer {
    pub args: ModelArgs,
    embed: Embedding,
    layers: Vec<Block>,
    norm: RmsNorm,
    head: Linear,
}

impl Transformer {
    pub fn new(args: ModelArgs) -> Self {
        let mut rng = StdRng::seed_from_u64(args.seed);
        let embed = Embedding::new(&mut rng, args.vocab_size, args.dim);
        let layers = (0..args.n_layers).map(|_| Block::new(&mut rng, &args)).collect();
        let norm = RmsNorm::new(args.dim);
        let head = Linear::new(&mut rng, args.dim, args.vocab_size, false);
        Self { args, embed, layers, norm, head }
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embed
    }

    pub fn head(&self) -> &Linear {
        &self.head
    }

    /// Logits for every position, shape `(tokens.len(), vocab_size)`.
    pub fn forward(&self, tokens: &[usize]) -> Array2<f32> {
        let mut h = self.embed.forward(tokens);
        for layer in &self.layers {
            h = layer.forward(&h);
        }
        self.head.forward(&self.norm.forward(&h))
    }
}

/// Check ids against the vocabulary and keep the trailing `window` tokens.
pub fn context_window(tokens: &[TokenId], vocab_size: usize, window: usize) -> Result<Vec<usize>> {
    if tokens.is_empty() {
        bail!("cannot predict from an empty token sequence");
    }
    let start = tokens.len().saturating_sub(window.max(1));
    tokens[start..]
        .iter()
        .map(|&id| {
            let idx = id as usize;
            if idx >= vocab_size {
                bail!("token id {id} is outside the model vocabulary of {vocab_size}");
            }
            Ok(idx)
        })
        .collect()
}

impl LanguageModel for Transformer {
    fn predict(&self, tokens: &[TokenId]) -> Result<Vec<f32>> {
        let window = context_window(tokens, self.args.vocab_size, self.args.max_seq_len)?;
        let logits = self.forward(&window);
        Ok(logits.row(logits.nrows() - 1).to_vec())
    }
}
