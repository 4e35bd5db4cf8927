//! Daemon - wires configuration, storage, and speech services into sessions

use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::ChatModel;
use crate::context::{ContextOrigin, SessionContext, SessionContextBuilder};
use crate::db::{self, Embedder, MemoryStore, Turn};
use crate::security::{CredentialStore, Registration};
use crate::session::{Orchestrator, OrchestratorSettings, Services, SessionControl, TurnOutcome};
use crate::voice::{AudioPlayback, CpalInput, SpeechToText, TextToSpeech};
use crate::{Config, Error, Result};

/// The Bujji daemon - owns the stores and builds sessions
pub struct Daemon {
    config: Config,
    credentials: CredentialStore,
    memory: MemoryStore,
    services: Services,
}

impl Daemon {
    /// Create a daemon with the configured HTTP services
    ///
    /// # Errors
    ///
    /// Returns error if the stores cannot be opened or a backend is misconfigured
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let credentials = CredentialStore::open(config.users_dir())?;

        let db_path = config.memory_db_path();
        let pool = db::init(&db_path)?;
        tracing::info!(path = %db_path.display(), "memory database initialized");

        let embedder = Arc::new(Embedder::from_config(&config)?);
        let memory = MemoryStore::new(pool, embedder);

        let model = ChatModel::from_config(&config)?;
        tracing::info!(provider = %config.llm.provider, model = model.model(), "language model ready");

        let services = Services {
            transcriber: Arc::new(SpeechToText::from_config(&config)?),
            synthesizer: Arc::new(TextToSpeech::from_config(&config)?),
            model: Arc::new(model),
        };

        Ok(Self::from_parts(config, credentials, memory, services))
    }

    /// Assemble a daemon from already-built parts
    #[must_use]
    pub const fn from_parts(
        config: Config,
        credentials: CredentialStore,
        memory: MemoryStore,
        services: Services,
    ) -> Self {
        Self {
            config,
            credentials,
            memory,
            services,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Register a user and create their memory collection
    ///
    /// # Errors
    ///
    /// Returns error if the identifier or password is invalid, or storage fails
    pub fn register(&self, user_id: &str, password: &str) -> Result<Registration> {
        let outcome = self.credentials.register(user_id, password)?;
        match outcome {
            Registration::Created => {
                self.memory.ensure_collection(user_id)?;
                tracing::info!(user = user_id, "user registered");
            }
            Registration::AlreadyExists => {
                tracing::info!(user = user_id, "registration skipped, user exists");
            }
        }
        Ok(outcome)
    }

    /// Verify credentials and build the user's session context
    ///
    /// # Errors
    ///
    /// Returns `Error::Auth` if the credentials do not match
    pub fn login(&self, user_id: &str, password: &str) -> Result<SessionContext> {
        self.authenticate(user_id, password)?;

        let context =
            SessionContextBuilder::new(self.memory.clone(), self.config.session.context_limit).build(user_id);

        if let ContextOrigin::Degraded(reason) = &context.origin {
            tracing::warn!(user = user_id, reason = %reason, "starting without prior context");
        }

        Ok(context)
    }

    /// Build an orchestrator for `context` without audio devices attached
    #[must_use]
    pub fn session(&self, context: SessionContext) -> Orchestrator {
        Orchestrator::new(
            context,
            OrchestratorSettings::from_config(&self.config),
            self.memory.clone(),
            self.services.clone(),
        )
    }

    /// The user's most recent stored turns, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the credentials are wrong or the memory store cannot be read
    pub fn history(&self, user_id: &str, password: &str, limit: usize) -> Result<Vec<Turn>> {
        self.authenticate(user_id, password)?;
        self.memory.load_recent(user_id, limit)
    }

    fn authenticate(&self, user_id: &str, password: &str) -> Result<()> {
        if self.credentials.authenticate(user_id, password) {
            return Ok(());
        }
        tracing::warn!(user = user_id, "login failed");
        Err(Error::Auth("invalid username or password".to_string()))
    }

    /// Run a spoken conversation until farewell or Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the audio devices cannot be opened or capture keeps failing
    #[allow(clippy::future_not_send)]
    pub async fn run_voice(&self, context: SessionContext) -> Result<()> {
        let control = SessionControl::new();
        spawn_ctrl_c(control.clone());

        let mut session = self
            .session(context)
            .with_control(control)
            .with_input(Box::new(CpalInput::new()?))
            .with_output(Box::new(AudioPlayback::new()?));

        let greeting = session.greet().await;
        println!("{}: {greeting}", self.config.persona.name);

        session.run().await
    }

    /// Run a typed conversation on stdin until farewell, EOF, or Ctrl-C
    ///
    /// Replies are spoken as well when `speak` is set.
    ///
    /// # Errors
    ///
    /// Returns error if stdin cannot be read or the speaker cannot be opened
    #[allow(clippy::future_not_send)]
    pub async fn run_text(&self, context: SessionContext, speak: bool) -> Result<()> {
        let control = SessionControl::new();
        spawn_ctrl_c(control.clone());
        let stop = control.stop_signal();

        let mut session = self.session(context).with_control(control);
        if speak {
            session = session.with_output(Box::new(AudioPlayback::new()?));
        }

        let name = self.config.persona.name.as_str();
        let greeting = session.greet().await;
        println!("{name}: {greeting}");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("{}> ", session.user_id());
            std::io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                () = stop.raised() => None,
            };

            let Some(line) = line else {
                println!();
                break;
            };

            match session.handle_text(&line).await {
                TurnOutcome::Replied { reply, .. } => println!("{name}: {reply}"),
                TurnOutcome::NotHeard { message } => println!("{name}: {message}"),
                TurnOutcome::Farewell { message } => {
                    println!("{name}: {message}");
                    break;
                }
                TurnOutcome::Cancelled => break,
                TurnOutcome::NoSpeech => {}
            }
        }

        Ok(())
    }
}

/// Request shutdown on Ctrl-C
fn spawn_ctrl_c(control: SessionControl) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            control.shutdown();
        }
    });
}
