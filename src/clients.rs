pub mod generation;

pub use generation::{GeminiClient, GeminiConfig, GenerationService, RetryingGenerationService};
