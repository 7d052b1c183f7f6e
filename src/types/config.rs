//! Configuration types
//!
//! Model and generation configuration structures.

use serde::{Deserialize, Serialize};

/// Quantization tier for the model weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    /// Lowest tier, smallest footprint (4-bit)
    Q4_0,
    /// Higher tier, better quality (8-bit)
    Q8_0,
}

impl Quantization {
    /// GGUF-style tag string ("q4_0" / "q8_0")
    pub fn tag(&self) -> &'static str {
        match self {
            Quantization::Q4_0 => "q4_0",
            Quantization::Q8_0 => "q8_0",
        }
    }
}

/// Model configuration recommended for the current device
///
/// Recomputed by the hardware estimator before each load; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    /// Quantization tier to run
    pub quantization: Quantization,
    /// Context window size in tokens
    pub context_size: u32,
}

/// Sampling parameters for text generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature parameter (0.0 - 2.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

/// A single generation request, constructed per turn
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Fully rendered prompt string
    pub prompt: String,
    /// Maximum number of tokens to produce
    pub max_tokens: u32,
    /// Generation ends when any of these matches a suffix of the output
    pub stop: Vec<String>,
    /// Sampling parameters
    pub sampling: SamplingParams,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32, stop: Vec<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            stop,
            sampling: SamplingParams::default(),
        }
    }
}

/// Identifies a model artifact: local filename plus its download source
///
/// Model selection is an explicit input to the session and orchestrator,
/// not a constant baked into the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Local artifact filename (e.g. "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf")
    pub name: String,
    /// HTTPS URL serving the artifact
    pub source_url: String,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_url: source_url.into(),
        }
    }

    /// The well-known TinyLlama chat artifact, small enough for low-memory devices
    pub fn tinyllama_chat() -> Self {
        Self::new(
            "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
            "https://huggingface.co/TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF/resolve/main/tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
        )
    }
}
