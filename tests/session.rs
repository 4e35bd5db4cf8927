//! Orchestrator and login integration tests
//!
//! Every remote service and audio device is faked; see `common`.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bujji::config::file::BujjiConfigFile;
use bujji::context::{ContextOrigin, SessionContext};
use bujji::security::{CredentialStore, Registration};
use bujji::db;
use bujji::session::{
    Orchestrator, OrchestratorSettings, Services, SessionControl, SessionState, TurnOutcome,
};
use bujji::voice::Capture;
use bujji::{Config, Daemon, Error, MemoryStore};

mod common;

use common::{
    BucketEmbedder, FailingOutput, FailingSynthesizer, Fakes, FakeModel, RecordingOutput,
    ScriptedInput, ShutdownTranscriber, memory_store,
};

const USER: &str = "ravi";

fn settings(dir: &tempfile::TempDir) -> OrchestratorSettings {
    OrchestratorSettings::with_defaults(dir.path().join("speech.mp3"))
}

fn voice_session(
    dir: &tempfile::TempDir,
    memory: &MemoryStore,
    fakes: &Fakes,
    lines: &[&str],
) -> (Orchestrator, RecordingOutput) {
    let control = SessionControl::new();
    let output = RecordingOutput::default();
    let session = Orchestrator::new(
        SessionContext::fresh(USER),
        settings(dir),
        memory.clone(),
        fakes.services(),
    )
    .with_control(control.clone())
    .with_input(Box::new(ScriptedInput::utterances(lines, control)))
    .with_output(Box::new(output.clone()));
    (session, output)
}

fn text_session(dir: &tempfile::TempDir, memory: &MemoryStore, fakes: &Fakes) -> Orchestrator {
    Orchestrator::new(
        SessionContext::fresh(USER),
        settings(dir),
        memory.clone(),
        fakes.services(),
    )
}

#[tokio::test]
async fn test_voice_turn_replies_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let (mut session, output) = voice_session(&dir, &memory, &fakes, &["ఎలా ఉన్నావు"]);

    let outcome = session.run_turn().await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Replied {
            utterance: "ఎలా ఉన్నావు".to_string(),
            reply: "reply: ఎలా ఉన్నావు".to_string(),
            fallback: false,
        }
    );
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.history().len(), 2);
    assert_eq!(fakes.spoken(), vec!["reply: ఎలా ఉన్నావు".to_string()]);

    let turns = memory.load_recent(USER, 10).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "ఎలా ఉన్నావు");
    assert_eq!(turns[1].content, "reply: ఎలా ఉన్నావు");

    let played = output.played();
    assert_eq!(played.len(), 1);
    assert!(played[0].existed);
    assert!(!played[0].path.exists());
}

#[tokio::test]
async fn test_termination_phrase_skips_model() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let (mut session, _output) = voice_session(&dir, &memory, &fakes, &["Bye!"]);

    let outcome = session.run_turn().await.unwrap();

    let farewell = "సర్లే నువ్వు వెళ్ళి రా!".to_string();
    assert_eq!(outcome, TurnOutcome::Farewell { message: farewell.clone() });
    assert_eq!(fakes.model.calls(), 0);
    assert_eq!(fakes.spoken(), vec![farewell.clone()]);
    assert_eq!(session.state(), SessionState::ShuttingDown);
    assert!(session.control().is_shutdown());

    let turns = memory.load_recent(USER, 10).unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].content, farewell);
}

#[tokio::test]
async fn test_model_failure_speaks_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::with_model(FakeModel::failing());
    let (mut session, _output) = voice_session(&dir, &memory, &fakes, &["hello"]);

    let outcome = session.run_turn().await.unwrap();

    let TurnOutcome::Replied { reply, fallback, .. } = outcome else {
        panic!("expected a reply, got {outcome:?}");
    };
    assert!(fallback);
    assert!(reply.starts_with("ఏదో తప్పు జరిగింది"));
    assert_eq!(fakes.spoken(), vec![reply.clone()]);
    assert_eq!(session.state(), SessionState::Idle);

    let turns = memory.load_recent(USER, 10).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].content, reply);
}

#[tokio::test]
async fn test_unrecognized_audio_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let (mut session, output) = voice_session(&dir, &memory, &fakes, &["   "]);

    let outcome = session.run_turn().await.unwrap();

    assert_eq!(outcome, TurnOutcome::NoSpeech);
    assert_eq!(session.state(), SessionState::Idle);
    // Tried every configured language
    assert_eq!(fakes.transcriber.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(fakes.model.calls(), 0);
    assert!(fakes.spoken().is_empty());
    assert!(output.played().is_empty());
    assert_eq!(memory.count(USER).unwrap(), 0);
}

#[tokio::test]
async fn test_second_language_is_tried() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let mut fakes = Fakes::new();
    fakes.transcriber = std::sync::Arc::new(common::EchoTranscriber::new("en-US"));
    let (mut session, _output) = voice_session(&dir, &memory, &fakes, &["how are you"]);

    let outcome = session.run_turn().await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Replied { fallback: false, .. }));
    assert_eq!(fakes.model.calls(), 1);
}

#[tokio::test]
async fn test_silence_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let control = SessionControl::new();
    let mut session = text_session(&dir, &memory, &fakes)
        .with_control(control.clone())
        .with_input(Box::new(ScriptedInput::captures(vec![Ok(Capture::Silence)], control)));

    assert_eq!(session.run_turn().await.unwrap(), TurnOutcome::NoSpeech);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_interrupted_playback_removes_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let control = SessionControl::new();
    let output = RecordingOutput {
        interrupt_with: Some(control.clone()),
        ..RecordingOutput::default()
    };
    let mut session = text_session(&dir, &memory, &fakes)
        .with_control(control)
        .with_output(Box::new(output.clone()));

    let outcome = session.handle_text("ఒక కథ చెప్పు").await;

    assert!(matches!(outcome, TurnOutcome::Replied { .. }));
    let played = output.played();
    assert_eq!(played.len(), 1);
    assert!(played[0].existed);
    assert!(!dir.path().join("speech.mp3").exists());
    // An interrupt does not end the session
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.control().is_shutdown());
}

#[tokio::test]
async fn test_empty_text_gets_not_heard_without_model() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let mut session = text_session(&dir, &memory, &fakes);

    let outcome = session.handle_text("   ").await;

    let TurnOutcome::NotHeard { message } = outcome else {
        panic!("expected not-heard, got {outcome:?}");
    };
    assert!(message.starts_with("నేను మీ మాట వినలేదు"));
    assert_eq!(fakes.model.calls(), 0);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_rolling_history_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let mut session = text_session(&dir, &memory, &fakes);

    for i in 0..7 {
        session.handle_text(&format!("message {i}")).await;
    }

    assert_eq!(session.history().len(), 10);
    assert_eq!(
        *fakes.model.history_lens.lock().unwrap(),
        vec![0, 2, 4, 6, 8, 10, 10]
    );
    let oldest = session.history().iter().next().unwrap();
    assert_eq!(oldest.content, "message 2");

    // Evicted turns stay in memory
    assert_eq!(memory.count(USER).unwrap(), 14);
}

#[tokio::test]
async fn test_greeting_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let (mut session, output) = voice_session(&dir, &memory, &fakes, &[]);

    let greeting = session.greet().await;

    assert_eq!(greeting, "నమస్కారం ravi!");
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(output.played().len(), 1);
    assert_eq!(memory.load_recent(USER, 1).unwrap()[0].content, greeting);
}

#[tokio::test]
async fn test_run_until_farewell() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let (mut session, _output) = voice_session(&dir, &memory, &fakes, &["hello", "", "quit"]);

    session.run().await.unwrap();

    assert_eq!(session.state(), SessionState::ShuttingDown);
    assert_eq!(fakes.model.calls(), 1);
    assert_eq!(memory.count(USER).unwrap(), 3);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let (mut session, _output) = voice_session(&dir, &memory, &fakes, &["hello"]);

    // The scripted input requests shutdown once exhausted
    session.run().await.unwrap();

    assert_eq!(session.state(), SessionState::ShuttingDown);
    assert_eq!(fakes.model.calls(), 1);
}

#[tokio::test]
async fn test_run_gives_up_after_repeated_capture_failures() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let control = SessionControl::new();
    let failures = (0..3)
        .map(|_| Err(Error::Audio("device unplugged".to_string())))
        .collect();
    let mut session = text_session(&dir, &memory, &fakes)
        .with_control(control.clone())
        .with_input(Box::new(ScriptedInput::captures(failures, control)));

    assert!(session.run().await.is_err());
    assert_eq!(session.state(), SessionState::ShuttingDown);
}

#[tokio::test]
async fn test_shutdown_cancels_next_turn() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let mut session = text_session(&dir, &memory, &fakes);

    session.control().shutdown();

    assert_eq!(session.handle_text("hello").await, TurnOutcome::Cancelled);
    assert_eq!(session.state(), SessionState::ShuttingDown);
    assert_eq!(fakes.model.calls(), 0);
}

#[tokio::test]
async fn test_shutdown_during_transcription_skips_reply() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let control = SessionControl::new();
    let services = Services {
        transcriber: Arc::new(ShutdownTranscriber { control: control.clone() }),
        ..fakes.services()
    };
    let output = RecordingOutput::default();
    let mut session = Orchestrator::new(
        SessionContext::fresh(USER),
        settings(&dir),
        memory.clone(),
        services,
    )
        .with_control(control.clone())
        .with_input(Box::new(ScriptedInput::utterances(&["ఎలా ఉన్నావు"], control)))
        .with_output(Box::new(output.clone()));

    assert_eq!(session.run_turn().await.unwrap(), TurnOutcome::Cancelled);
    assert_eq!(session.state(), SessionState::ShuttingDown);
    assert_eq!(fakes.model.calls(), 0);
    assert_eq!(memory.count(USER).unwrap(), 0);
    assert!(output.played().is_empty());
}

#[tokio::test]
async fn test_memory_write_failure_still_replies() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_memory().unwrap();
    let memory = MemoryStore::new(pool.clone(), Arc::new(BucketEmbedder));
    pool.get()
        .unwrap()
        .execute_batch("DROP TABLE turns_vec; DROP TABLE turns;")
        .unwrap();
    let fakes = Fakes::new();
    let mut session = text_session(&dir, &memory, &fakes);

    let outcome = session.handle_text("ఏం చేస్తున్నావు").await;

    assert_eq!(
        outcome,
        TurnOutcome::Replied {
            utterance: "ఏం చేస్తున్నావు".to_string(),
            reply: "reply: ఏం చేస్తున్నావు".to_string(),
            fallback: false,
        }
    );
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.history().len(), 2);
    assert!(memory.load_recent(USER, 5).is_err());
}

#[tokio::test]
async fn test_synthesis_failure_keeps_conversation_going() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let synthesizer = Arc::new(FailingSynthesizer::default());
    let services = Services {
        synthesizer: synthesizer.clone(),
        ..fakes.services()
    };
    let control = SessionControl::new();
    let output = RecordingOutput::default();
    let mut session = Orchestrator::new(
        SessionContext::fresh(USER),
        settings(&dir),
        memory.clone(),
        services,
    )
        .with_control(control.clone())
        .with_input(Box::new(ScriptedInput::utterances(&["hello", "again"], control)))
        .with_output(Box::new(output.clone()));

    assert!(matches!(session.run_turn().await.unwrap(), TurnOutcome::Replied { .. }));
    assert_eq!(session.state(), SessionState::Idle);

    session.run().await.unwrap();

    assert_eq!(fakes.model.calls(), 2);
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);
    assert!(output.played().is_empty());
    assert_eq!(memory.count(USER).unwrap(), 4);
}

#[tokio::test]
async fn test_playback_failure_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let control = SessionControl::new();
    let output = FailingOutput::default();
    let mut session = text_session(&dir, &memory, &fakes)
        .with_control(control.clone())
        .with_input(Box::new(ScriptedInput::utterances(&["hello", "again"], control)))
        .with_output(Box::new(output.clone()));

    assert!(matches!(session.run_turn().await.unwrap(), TurnOutcome::Replied { .. }));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!dir.path().join("speech.mp3").exists());

    session.run().await.unwrap();

    assert_eq!(fakes.model.calls(), 2);
    assert_eq!(output.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(session.state(), SessionState::ShuttingDown);
}

fn test_config(dir: &tempfile::TempDir) -> Config {
    let data_dir = dir.path().to_string_lossy().to_string();
    Config::from_sources(BujjiConfigFile::default(), |key| match key {
        "BUJJI_DATA_DIR" => Some(data_dir.clone()),
        "GOOGLE_API_KEY" | "OPENAI_API_KEY" => Some("test-key".to_string()),
        _ => None,
    })
    .unwrap()
}

fn daemon(dir: &tempfile::TempDir, memory: &MemoryStore, fakes: &Fakes) -> Daemon {
    let config = test_config(dir);
    let credentials = CredentialStore::open(config.users_dir()).unwrap();
    Daemon::from_parts(config, credentials, memory.clone(), fakes.services())
}

#[tokio::test]
async fn test_register_and_login() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let daemon = daemon(&dir, &memory, &fakes);

    assert_eq!(daemon.register(USER, "secret").unwrap(), Registration::Created);
    assert_eq!(daemon.register(USER, "other").unwrap(), Registration::AlreadyExists);
    assert!(memory.has_collection(USER).unwrap());

    assert!(matches!(daemon.login(USER, "other"), Err(Error::Auth(_))));
    assert!(matches!(daemon.login("nobody", "secret"), Err(Error::Auth(_))));

    let context = daemon.login(USER, "secret").unwrap();
    assert_eq!(context.origin, ContextOrigin::Fresh);
    assert!(context.messages.is_empty());
}

#[tokio::test]
async fn test_history_requires_password() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let daemon = daemon(&dir, &memory, &fakes);
    daemon.register(USER, "secret").unwrap();
    daemon
        .session(daemon.login(USER, "secret").unwrap())
        .handle_text("నా పేరు రవి")
        .await;

    assert!(matches!(daemon.history(USER, "wrong", 10), Err(Error::Auth(_))));
    assert!(matches!(daemon.history("nobody", "secret", 10), Err(Error::Auth(_))));

    let turns = daemon.history(USER, "secret", 10).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "నా పేరు రవి");
}

#[tokio::test]
async fn test_login_restores_previous_session() {
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_store();
    let fakes = Fakes::new();
    let daemon = daemon(&dir, &memory, &fakes);
    daemon.register(USER, "secret").unwrap();

    let mut first = daemon.session(daemon.login(USER, "secret").unwrap());
    first.handle_text("నా పేరు రవి").await;

    let context = daemon.login(USER, "secret").unwrap();
    assert_eq!(context.origin, ContextOrigin::Restored);
    assert_eq!(context.messages.len(), 2);
    assert_eq!(context.messages[0].content, "నా పేరు రవి");

    let mut second = daemon.session(context);
    second.handle_text("నా పేరు ఏంటి").await;
    // The model saw the restored exchange
    assert_eq!(*fakes.model.history_lens.lock().unwrap(), vec![0, 2]);
}
