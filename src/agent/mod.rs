//! Language model access

pub mod llm;

pub use llm::{ChatModel, LanguageModel};
