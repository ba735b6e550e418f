//! Concrete provider adapters: Groq and OpenRouter (both OpenAI-compatible
//! SSE), and Ollama (local, JSONL framing). See spec.md §4.2.

mod line_buffer;
mod ollama;
mod openai_wire;
mod openrouter;
mod groq;

pub use groq::GroqProvider;
pub use ollama::OllamaProvider;
pub use openrouter::OpenRouterProvider;

pub mod defaults {
    pub use crate::groq::{DEFAULT_BASE_URL as GROQ_BASE_URL, DEFAULT_MODEL as GROQ_MODEL};
    pub use crate::ollama::{DEFAULT_BASE_URL as OLLAMA_BASE_URL, DEFAULT_MODEL as OLLAMA_MODEL};
    pub use crate::openrouter::{DEFAULT_BASE_URL as OPENROUTER_BASE_URL, DEFAULT_MODEL as OPENROUTER_MODEL};
}
