//! Conversation state machine

/// Where the conversation loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    Transcribing,
    Thinking,
    Speaking,
    /// Terminal
    ShuttingDown,
}

/// Inputs that drive [`SessionState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Session-start welcome message
    Greet,
    BeginCapture,
    CaptureComplete,
    CaptureAborted,
    NothingRecognized,
    Recognized,
    TextSubmitted,
    ReplyReady,
    PlaybackFinished,
    Shutdown,
}

impl SessionState {
    /// The state after `event`, or `None` if the event is not valid here
    #[must_use]
    pub const fn on(self, event: Event) -> Option<Self> {
        use Event as E;
        use SessionState as S;

        match (self, event) {
            (S::ShuttingDown, _) => None,
            (_, E::Shutdown) => Some(S::ShuttingDown),
            (S::Idle, E::BeginCapture) => Some(S::Listening),
            (S::Idle, E::Greet) => Some(S::Speaking),
            (S::Idle, E::TextSubmitted) => Some(S::Thinking),
            (S::Listening, E::CaptureComplete) => Some(S::Transcribing),
            (S::Listening, E::CaptureAborted) | (S::Transcribing, E::NothingRecognized) | (S::Speaking, E::PlaybackFinished) => {
                Some(S::Idle)
            }
            (S::Transcribing, E::Recognized) => Some(S::Thinking),
            // Transcribing -> Speaking is the farewell path, which skips the model
            (S::Thinking | S::Transcribing, E::ReplyReady) => Some(S::Speaking),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ShuttingDown)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::ShuttingDown => "shutting-down",
        };
        write!(f, "{name}")
    }
}
