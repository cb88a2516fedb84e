//! On-device inference for the LocalChat app.
//!
//! The bundled model is an 8-bit quantized embedding + output head read from
//! a flat little-endian file (optionally memory-mapped). [`ChatEngine`] pairs
//! it with a tokenizer and exposes the generation loop; [`ffi`] wraps the
//! engine in a C ABI for the app's UI layer.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use bytemuck::cast_slice;
use memmap2::MmapOptions;
use ndarray::{Array1, Array2, ArrayView2, Axis};

use localchat::model::{context_window, Embedding, Linear};
use localchat::{GenerationConfig, GenerationResult, Generator, LanguageModel, Status, TokenId, Transformer, WordTokenizer};

pub mod ffi;
pub use ffi::*;

/// Symmetric max-abs quantization to `i8` with one scale per tensor.
///
/// Returns the quantized values and the factor that maps them back to `f32`.
pub fn quantize_tensor(t: &Array2<f32>) -> (Vec<i8>, f32) {
    let max = t.iter().fold(0.0_f32, |m, &v| m.max(v.abs()));
    let scale = if max == 0.0 { 1.0 } else { 127.0 / max };
    let data = t.iter().map(|&v| (v * scale).round() as i8).collect();
    (data, 1.0 / scale)
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Bounds-checked cursor over a model file.
struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, len: usize) -> io::Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                invalid_data(format!(
                    "model file truncated: need {len} bytes at offset {}, file has {}",
                    self.offset,
                    self.buf.len()
                ))
            })?;
        let bytes = &self.buf[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> io::Result<usize> {
        Ok(u32::from_le_bytes(self.array()?) as usize)
    }

    fn f32(&mut self) -> io::Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn i8s(&mut self, rows: usize, cols: usize) -> io::Result<Vec<i8>> {
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| invalid_data(format!("tensor of {rows}x{cols} is too large")))?;
        Ok(cast_slice::<u8, i8>(self.take(len)?).to_vec())
    }
}

fn dequantize(weight: &[i8], rows: usize, cols: usize, scale: f32) -> Array2<f32> {
    // lengths are checked when the tensor is built
    ArrayView2::from_shape((rows, cols), weight)
        .map(|w| w.mapv(|q| f32::from(q) * scale))
        .unwrap_or_else(|_| Array2::zeros((rows, cols)))
}

/// Quantized linear layer.
#[derive(Clone, Debug)]
pub struct QLinear {
    weight: Vec<i8>,
    bias: Option<Array1<f32>>,
    scale: f32,
    in_features: usize,
    out_features: usize,
}

impl QLinear {
    pub fn from_linear(l: &Linear) -> Self {
        let (weight, scale) = quantize_tensor(l.weight());
        Self {
            weight,
            bias: l.bias().cloned(),
            scale,
            in_features: l.weight().ncols(),
            out_features: l.weight().nrows(),
        }
    }

    fn read(reader: &mut ByteReader<'_>) -> io::Result<Self> {
        let out_features = reader.u32()?;
        let in_features = reader.u32()?;
        let scale = reader.f32()?;
        let weight = reader.i8s(out_features, in_features)?;
        let bias = match reader.u8()? {
            0 => None,
            1 => {
                let len = out_features
                    .checked_mul(4)
                    .ok_or_else(|| invalid_data(format!("bias of {out_features} values overflows")))?;
                let raw = reader.take(len)?;
                let b: Vec<f32> = raw
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Some(Array1::from(b))
            }
            flag => return Err(invalid_data(format!("bad bias flag {flag}"))),
        };
        Ok(Self { weight, bias, scale, in_features, out_features })
    }

    fn write(&self, f: &mut impl Write) -> io::Result<()> {
        f.write_all(&(self.out_features as u32).to_le_bytes())?;
        f.write_all(&(self.in_features as u32).to_le_bytes())?;
        f.write_all(&self.scale.to_le_bytes())?;
        f.write_all(cast_slice(&self.weight))?;
        match &self.bias {
            Some(b) => {
                f.write_all(&[1u8])?;
                for v in b.iter() {
                    f.write_all(&v.to_le_bytes())?;
                }
            }
            None => f.write_all(&[0u8])?,
        }
        Ok(())
    }

    pub fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        let weight = dequantize(&self.weight, self.out_features, self.in_features, self.scale);
        let mut out = input.dot(&weight.t());
        if let Some(b) = &self.bias {
            out += &b.view().insert_axis(Axis(0));
        }
        out
    }
}

/// Quantized embedding layer.
#[derive(Clone, Debug)]
pub struct QEmbedding {
    weight: Vec<i8>,
    scale: f32,
    vocab: usize,
    dim: usize,
}

impl QEmbedding {
    pub fn from_embedding(e: &Embedding) -> Self {
        let (weight, scale) = quantize_tensor(e.weight());
        Self { weight, scale, vocab: e.weight().nrows(), dim: e.weight().ncols() }
    }

    fn read(reader: &mut ByteReader<'_>) -> io::Result<Self> {
        let vocab = reader.u32()?;
        let dim = reader.u32()?;
        let scale = reader.f32()?;
        let weight = reader.i8s(vocab, dim)?;
        Ok(Self { weight, scale, vocab, dim })
    }

    fn write(&self, f: &mut impl Write) -> io::Result<()> {
        f.write_all(&(self.vocab as u32).to_le_bytes())?;
        f.write_all(&(self.dim as u32).to_le_bytes())?;
        f.write_all(&self.scale.to_le_bytes())?;
        f.write_all(cast_slice(&self.weight))
    }

    /// # Panics
    /// If a token is outside the vocabulary.
    pub fn forward(&self, tokens: &[usize]) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((tokens.len(), self.dim));
        for (mut row, &tok) in out.axis_iter_mut(Axis(0)).zip(tokens) {
            assert!(tok < self.vocab, "token {tok} outside vocabulary of {}", self.vocab);
            let start = tok * self.dim;
            for (dst, &q) in row.iter_mut().zip(&self.weight[start..start + self.dim]) {
                *dst = f32::from(q) * self.scale;
            }
        }
        out
    }
}

/// Quantized model holding only the embedding and output head.
///
/// Next-token logits depend on the last token alone.
#[derive(Clone, Debug)]
pub struct QuantizedModel {
    pub embed: QEmbedding,
    pub head: QLinear,
}

impl QuantizedModel {
    pub fn from_transformer(m: &Transformer) -> Self {
        Self {
            embed: QEmbedding::from_embedding(m.embedding()),
            head: QLinear::from_linear(m.head()),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.embed.vocab
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut f = io::BufWriter::new(File::create(path)?);
        self.embed.write(&mut f)?;
        self.head.write(&mut f)?;
        f.flush()
    }

    /// Parse a model from raw file bytes.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let embed = QEmbedding::read(&mut reader)?;
        let head = QLinear::read(&mut reader)?;
        if head.in_features != embed.dim || head.out_features != embed.vocab {
            return Err(invalid_data(format!(
                "head is {}x{} but embedding is {}x{}",
                head.out_features, head.in_features, embed.vocab, embed.dim
            )));
        }
        Ok(Self { embed, head })
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn load_mmap(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        // the map is only read while parsing and dropped before returning
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Self::from_bytes(&mmap[..])
    }

    pub fn forward(&self, tokens: &[usize]) -> Array2<f32> {
        self.head.forward(&self.embed.forward(tokens))
    }
}

impl LanguageModel for QuantizedModel {
    fn predict(&self, tokens: &[TokenId]) -> anyhow::Result<Vec<f32>> {
        let last = context_window(tokens, self.vocab_size(), 1)?;
        Ok(self.forward(&last).row(0).to_vec())
    }
}

/// Quantize a seeded transformer sized for `tokenizer` and save it.
pub fn quantize_for_tokenizer(tokenizer: &WordTokenizer, seed: u64, out: &Path) -> io::Result<QuantizedModel> {
    let args = localchat::ModelArgs {
        seed,
        ..localchat::ModelArgs::for_vocab(tokenizer.vocab_size())
    };
    let q = QuantizedModel::from_transformer(&Transformer::new(args));
    q.save(out)?;
    Ok(q)
}

/// The app's generation engine built from on-disk artifacts.
///
/// Artifacts that fail to load are logged and left out; generating without
/// them reports `ResourceUnavailable` instead of failing construction.
pub struct ChatEngine {
    generator: Generator,
}

impl ChatEngine {
    pub fn load(model_path: Option<&Path>, tokenizer_path: Option<&Path>, config: GenerationConfig) -> Self {
        let mut generator = Generator::new(config);

        let tokenizer = tokenizer_path.and_then(|path| match WordTokenizer::from_json(path) {
            Ok(tokenizer) => Some(tokenizer),
            Err(err) => {
                tracing::warn!("failed to load tokenizer {}: {err:#}", path.display());
                None
            }
        });
        let model = model_path.and_then(|path| {
            match QuantizedModel::load_mmap(path).or_else(|_| QuantizedModel::load(path)) {
                Ok(model) => Some(model),
                Err(err) => {
                    tracing::warn!("failed to load model {}: {err}", path.display());
                    None
                }
            }
        });

        if let (Some(tokenizer), Some(model)) = (&tokenizer, &model) {
            if tokenizer.vocab_size() != model.vocab_size() {
                tracing::warn!(
                    tokenizer = tokenizer.vocab_size(),
                    model = model.vocab_size(),
                    "tokenizer and model vocabulary sizes differ"
                );
            }
        }
        if let Some(tokenizer) = tokenizer {
            generator = generator.with_tokenizer(std::sync::Arc::new(tokenizer));
        }
        if let Some(model) = model {
            generator = generator.with_model(std::sync::Arc::new(model));
        }
        if generator.is_ready() {
            tracing::info!("model and tokenizer loaded");
        }
        Self { generator }
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn is_ready(&self) -> bool {
        self.generator.is_ready()
    }

    pub fn generate_with<F: FnMut(Status)>(&self, prompt: &str, on_status: F) -> GenerationResult {
        self.generator.generate_with(prompt, on_status)
    }
}
