use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sotto::audio::{AudioCapture, calculate_rms, input_devices};
use sotto::{ActivationMode, Config, PipelineBuilder};

/// Sotto - voice dictation backend
#[derive(Parser)]
#[command(name = "sotto", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to the XDG location)
    #[arg(short, long, env = "SOTTO_CONFIG")]
    config: Option<PathBuf>,

    /// Activation mode: manual, wake-word, or always-on
    #[arg(long, env = "SOTTO_ACTIVATION_MODE")]
    activation_mode: Option<String>,

    /// Wake phrase for wake-word mode
    #[arg(long, env = "SOTTO_WAKE_PHRASE")]
    wake_phrase: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// List audio input devices
    Devices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,sotto=info",
        1 => "info,sotto=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::Devices => list_devices(),
        };
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(mode) = &cli.activation_mode {
        config.wake.mode = ActivationMode::from_str_lossy(mode);
    }
    if let Some(phrase) = cli.wake_phrase {
        config.wake.phrase = phrase;
    }
    config.validate()?;

    tracing::info!(
        mode = %config.wake.mode,
        stt = %config.stt.provider,
        "starting sotto"
    );

    let mut capture = AudioCapture::new(config.audio.clone())?;
    let wake_phrase = (config.wake.mode == ActivationMode::WakeWord)
        .then(|| config.wake.phrase.clone());

    let pipeline = PipelineBuilder::new(config)
        .queue(capture.queue())
        .build()?;

    // Shutdown on ctrl-c
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    capture.start()?;
    if let Some(phrase) = wake_phrase {
        tracing::info!("listening for wake phrase \"{phrase}\"");
    } else {
        tracing::info!("listening");
    }

    let stats = pipeline.run(&mut shutdown_rx).await;
    capture.stop();
    let stats = stats?;

    tracing::info!(
        transcriptions = stats.transcriptions,
        cache_hits = stats.cache_hits,
        failures = stats.failures,
        "sotto stopped"
    );
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(sotto::config::AudioConfig::default())?;
    let queue = capture.queue();
    capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let frames = queue.drain();
        let samples: Vec<f32> = frames
            .iter()
            .flat_map(|f| f.samples().iter().copied())
            .collect();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// List audio input devices
fn list_devices() -> anyhow::Result<()> {
    let devices = input_devices()?;

    if devices.is_empty() {
        println!("No audio input devices found");
        return Ok(());
    }

    println!("Audio input devices:");
    for (i, name) in devices.iter().enumerate() {
        println!("  [{i}] {name}");
    }

    Ok(())
}
