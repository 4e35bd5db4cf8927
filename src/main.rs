use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bujji::security::Registration;
use bujji::session::StopSignal;
use bujji::voice::{AudioCapture, AudioPlayback, Synthesizer, TextToSpeech, calculate_energy, decode_mp3};
use bujji::{Config, Daemon};

/// Bujji - a Telugu voice companion with long-term memory
#[derive(Parser)]
#[command(name = "bujji", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Create a new user
    Register {
        /// Username (letters, digits, '-', '_', '.')
        user: String,
    },
    /// Log in and talk by voice
    Chat {
        user: String,
    },
    /// Log in and talk by typing
    Text {
        user: String,
        /// Also speak replies aloud
        #[arg(long)]
        speak: bool,
    },
    /// Show a user's stored conversation
    History {
        user: String,
        /// Number of turns to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "నమస్కారం! ఇది ఒక పరీక్ష.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,bujji=info",
        1 => "info,bujji=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Register { user } => register(&user),
        Command::Chat { user } => {
            let daemon = Daemon::new(Config::load()?)?;
            let context = login(&daemon, &user)?;
            daemon.run_voice(context).await?;
            Ok(())
        }
        Command::Text { user, speak } => {
            let daemon = Daemon::new(Config::load()?)?;
            let context = login(&daemon, &user)?;
            daemon.run_text(context, speak).await?;
            Ok(())
        }
        Command::History { user, limit } => history(&user, limit),
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&text).await,
    }
}

fn register(user: &str) -> anyhow::Result<()> {
    let daemon = Daemon::new(Config::load()?)?;

    let password = dialoguer::Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()?;

    match daemon.register(user, &password)? {
        Registration::Created => println!("Registered {user}"),
        Registration::AlreadyExists => println!("User {user} already exists"),
    }

    Ok(())
}

fn login(daemon: &Daemon, user: &str) -> anyhow::Result<bujji::context::SessionContext> {
    let password = dialoguer::Password::new().with_prompt("Password").interact()?;
    let context = daemon.login(user, &password)?;
    println!("Logged in as {user} ({} earlier messages)", context.messages.len());
    Ok(context)
}

fn history(user: &str, limit: usize) -> anyhow::Result<()> {
    let daemon = Daemon::new(Config::load()?)?;
    let password = dialoguer::Password::new().with_prompt("Password").interact()?;
    let turns = daemon.history(user, &password, limit)?;

    if turns.is_empty() {
        println!("No conversation stored for {user}");
        return Ok(());
    }

    for turn in turns {
        println!(
            "[{}] {}: {}",
            turn.created_at.format("%Y-%m-%d %H:%M:%S"),
            turn.role,
            turn.content
        );
    }

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = AudioPlayback::new()?;

    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    playback.play_samples(samples, sample_rate, &StopSignal::never()).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Test TTS output with the key-less Google endpoint
#[allow(clippy::future_not_send)]
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = TextToSpeech::new_google();
    let mp3 = tts.synthesize(text, "te").await?;
    println!("Got {} bytes of audio data", mp3.len());

    let (samples, sample_rate) = decode_mp3(&mp3)?;
    let mut playback = AudioPlayback::new()?;
    playback.play_samples(samples, sample_rate, &StopSignal::never()).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
