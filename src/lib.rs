//! Bujji - a Telugu voice companion with per-user long-term memory
//!
//! This library provides the core functionality for Bujji:
//! - Credential storage and verification
//! - Vector memory of every conversation turn
//! - Session context restored at login
//! - The turn orchestrator (listen, transcribe, think, speak)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                       │
//! │        Voice (mic + speaker)  │  Text (stdin)       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Orchestrator                       │
//! │   State machine  │  Rolling history  │  Recall     │
//! └──────┬──────────────────┬──────────────────┬────────┘
//!        │                  │                  │
//! ┌──────▼──────┐   ┌───────▼───────┐   ┌──────▼──────┐
//! │  STT / TTS  │   │  LLM (Gemini  │   │ Memory store│
//! │   (HTTP)    │   │   / Ollama)   │   │ (sqlite-vec)│
//! └─────────────┘   └───────────────┘   └─────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod daemon;
pub mod db;
pub mod error;
pub mod security;
pub mod session;
pub mod voice;

pub use config::Config;
pub use context::{SessionContext, SessionContextBuilder};
pub use daemon::Daemon;
pub use db::{DbConn, DbPool, MemoryStore};
pub use error::{Error, Result};
pub use security::CredentialStore;
pub use session::{Orchestrator, SessionControl, SessionState, TurnOutcome};
