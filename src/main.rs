use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vesper_agent::voice::{
    AudioPlayback, CpalMicrophone, Microphone, PLAYBACK_SAMPLE_RATE, VoiceParams, dsp,
};
use vesper_agent::daemon::build_synthesizer;
use vesper_agent::{Config, Daemon};

/// Vesper - voice-first personal agent
#[derive(Parser)]
#[command(name = "vesper", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/vesper/config.toml)
    #[arg(short, long, env = "VESPER_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice input (for machines without a microphone)
    #[arg(long, env = "VESPER_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
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
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Ask a single question and speak the reply
    Ask {
        /// What to say to the agent
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,vesper_agent=info",
        1 => "info,vesper_agent=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => {
                tokio::task::spawn_blocking(move || test_mic(duration)).await?
            }
            Command::TestSpeaker => tokio::task::spawn_blocking(test_speaker).await?,
            Command::TestTts { text } => test_tts(Config::load(config_path, true)?, &text).await,
            Command::Ask { text } => {
                let daemon = Daemon::new(Config::load(config_path, true)?)?;
                let reply = daemon.ask(&text).await?;
                println!("{reply}");
                Ok(())
            }
        };
    }

    tracing::info!(disable_voice = cli.disable_voice, "starting vesper");

    let config = Config::load(config_path, cli.disable_voice)?;
    tracing::debug!(?config, "loaded configuration");

    if config.voice.enabled {
        tracing::info!(wake_words = ?config.voice.wake_words, "vesper ready");
    } else {
        tracing::info!("vesper ready (voice input disabled)");
    }

    Daemon::new(config)?.run().await?;

    Ok(())
}

/// Test microphone input
fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut mic = CpalMicrophone::open()?;
    let sample_rate = mic.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    // 100ms frames
    let mut frame = vec![0i16; usize::try_from(sample_rate / 10)?];
    for i in 0..duration {
        let second = Instant::now();
        let mut energy = 0.0f32;
        let mut peak = 0i16;

        while second.elapsed() < Duration::from_secs(1) {
            mic.read_frame(&mut frame)?;
            energy = energy.max(dsp::rms(&frame));
            peak = peak.max(frame.iter().map(|s| s.saturating_abs()).max().unwrap_or(0));
        }

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy / 200.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:7.1} | Peak: {peak:5} | [{meter}]", i + 1);
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let frequency = 440.0_f32;
    let num_samples = usize::try_from(PLAYBACK_SAMPLE_RATE)? * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());
    playback.play_samples(samples, &AtomicBool::new(false))?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test the configured TTS backend
async fn test_tts(config: Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let voice = VoiceParams {
        voice: config.voice.tts_voice.clone(),
        speed: config.voice.tts_speed,
    };
    let timeout = config.voice.tts_timeout;
    let synth = build_synthesizer(&config)?;

    println!("Speaking...");
    tokio::time::timeout(timeout, synth.speak(text, &voice))
        .await
        .map_err(|_| anyhow::anyhow!("TTS timed out after {timeout:?}"))??;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
