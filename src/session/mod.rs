//! Conversation sessions
//!
//! A session is one logged-in user's conversation. The [`Orchestrator`]
//! moves it through [`SessionState`]; [`SessionControl`] lets other tasks
//! interrupt playback or end it.

mod control;
mod orchestrator;
mod phrases;
mod state;

pub use control::{SessionControl, StopSignal};
pub use orchestrator::{Orchestrator, OrchestratorSettings, Services, TurnOutcome};
pub use phrases::{LocaleMessages, TerminationPhrases, normalize};
pub use state::{Event, SessionState};
