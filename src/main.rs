use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use parley::voice::{
    CaptureDevice, FRAME_SIZE, MicrophoneCapture, PlaybackEvent, PlaybackOutput,
    PlaybackScheduler, SAMPLE_RATE, SpeakerOutput, decode_pcm16, samples_to_wav,
};
use parley::{Config, Negotiator, SessionState, SignalReceivers};

/// Parley - live voice negotiation channel for security consoles
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Persona file (`.toml` or plain text) overriding the configured one
    #[arg(long)]
    persona_file: Option<PathBuf>,

    /// Prebuilt voice name (e.g. "Charon", "Kore")
    #[arg(long)]
    voice: Option<String>,

    /// Model identifier
    #[arg(long)]
    model: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Open a negotiation session (default)
    Run,
    /// Test microphone capture and level metering
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured 16 kHz audio to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test gapless speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,parley=info",
        1 => "info,parley=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::TestMic { duration, output }) => test_mic(duration, output).await,
        Some(Command::TestSpeaker) => test_speaker().await,
        Some(Command::Run) | None => negotiate(cli.persona_file, cli.voice, cli.model).await,
    }
}

/// Run one negotiation session until it ends or Ctrl-C
#[allow(clippy::future_not_send)]
async fn negotiate(
    persona_file: Option<PathBuf>,
    voice: Option<String>,
    model: Option<String>,
) -> anyhow::Result<()> {
    let mut config = Config::load_with_options(persona_file.as_deref())?;

    if let Some(voice) = voice {
        config.voice = voice;
    }
    if let Some(model) = model {
        config.model = model;
    }
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    let mut negotiator = Negotiator::with_defaults(config);
    negotiator.on_entry(|entry| {
        println!(
            "{CLEAR_LINE}[{}] {}: {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.speaker,
            entry.text
        );
    });

    let status = tokio::spawn(show_status(negotiator.signals()));

    if let Err(e) = negotiator.connect().await {
        status.abort();
        return Err(e.into());
    }
    tracing::info!(
        persona = %negotiator.config().persona.name,
        "channel open - speak into the console microphone, Ctrl-C to hang up"
    );

    tokio::select! {
        () = negotiator.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, hanging up");
        }
    }

    let failed = negotiator.state() == SessionState::Error;
    let last_error = negotiator.last_error().map(ToString::to_string);
    negotiator.disconnect();
    status.abort();
    eprintln!("{CLEAR_LINE}");

    if failed {
        anyhow::bail!(
            "session ended: {}",
            last_error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    println!("\n{} transcript entries", negotiator.transcript().len());
    Ok(())
}

/// Erase the status line before printing over it
const CLEAR_LINE: &str = "\r\x1b[2K";

/// Width of the level meter in characters
const METER_WIDTH: usize = 50;

/// Level meter for an RMS value on the `0..=100` scale
fn meter_bar(rms: f32) -> String {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let filled = (rms / 2.0).clamp(0.0, METER_WIDTH as f32) as usize;
    "█".repeat(filled) + &" ".repeat(METER_WIDTH - filled)
}

/// One-line summary of the live signals
fn status_line(speaking: bool, volume: f32) -> String {
    let who = if speaking { "AI speaking" } else { "listening  " };
    format!("{who} | mic {volume:6.2} [{}]", meter_bar(volume))
}

/// Keep the status line current until the signals close
async fn show_status(mut signals: SignalReceivers) {
    loop {
        let speaking = *signals.speaking.borrow_and_update();
        let volume = *signals.volume.borrow_and_update();
        let connected = *signals.connected.borrow_and_update();
        if connected {
            eprint!("{CLEAR_LINE}{}", status_line(speaking, volume));
            let _ = std::io::stderr().flush();
        }

        let changed = tokio::select! {
            r = signals.speaking.changed() => r,
            r = signals.volume.changed() => r,
            r = signals.connected.changed() => r,
        };
        if changed.is_err() {
            break;
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut capture = MicrophoneCapture::start(FRAME_SIZE, tx)?;

    println!("Frames: {FRAME_SIZE} samples at {SAMPLE_RATE} Hz");
    println!("---");

    let mut recorded = Vec::new();
    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            chunk = rx.recv() => {
                let Some(chunk) = chunk else { break };
                let audio = decode_pcm16(&chunk.data, SAMPLE_RATE)?;
                let peak = audio.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

                println!("RMS: {:6.2} | Peak: {:.4} | [{}]", chunk.rms, peak, meter_bar(chunk.rms));

                if output.is_some() {
                    recorded.extend(audio.samples);
                }
            }
        }
    }

    capture.stop()?;

    if let Some(path) = output {
        let wav = samples_to_wav(&recorded, SAMPLE_RATE)?;
        std::fs::write(&path, wav)?;
        println!("\nWrote {} samples to {}", recorded.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with back-to-back tone bursts
///
/// Each burst is scheduled as a separate buffer; they should sound as one
/// continuous rising chord with no clicks or gaps between them.
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear three tones back to back, with no gaps\n");

    let (tx, mut events) = mpsc::unbounded_channel();
    let mut playback = SpeakerOutput::start(tx)?;
    let mut scheduler = PlaybackScheduler::new();

    let sample_rate = playback.sample_rate();
    for frequency in [440.0_f32, 554.37, 659.25] {
        let samples = tone(frequency, 0.6, sample_rate);
        #[allow(clippy::cast_precision_loss)]
        let duration = samples.len() as f64 / f64::from(sample_rate);

        let buffer = scheduler.schedule(playback.current_time(), duration);
        println!(
            "Buffer {} at {:.3}s for {:.3}s ({frequency} Hz)",
            buffer.id, buffer.start, buffer.duration
        );
        let actual_start = playback.start(&buffer, samples)?;
        scheduler.settle(buffer.id, actual_start);
    }

    let wait = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(wait);

    loop {
        tokio::select! {
            () = &mut wait => {
                println!("Timed out waiting for playback to finish");
                break;
            }
            event = events.recv() => match event {
                Some(PlaybackEvent::Ended(id)) => {
                    if scheduler.finish(id) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    playback.close()?;

    println!("\n---");
    println!("If you heard the tones, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Sine tone with short fades so bursts join cleanly
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let rate = sample_rate as f32;
    let len = (rate * seconds) as usize;
    let fade = (rate * 0.005) as usize;

    (0..len)
        .map(|i| {
            let t = i as f32 / rate;
            let edge = i.min(len - 1 - i);
            let gain = if edge < fade { edge as f32 / fade as f32 } else { 1.0 };
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * gain
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_scales_and_clamps() {
        assert_eq!(meter_bar(0.0).chars().filter(|&c| c == '█').count(), 0);
        assert_eq!(meter_bar(20.0).chars().filter(|&c| c == '█').count(), 10);
        assert_eq!(meter_bar(500.0).chars().filter(|&c| c == '█').count(), METER_WIDTH);
        assert_eq!(meter_bar(-3.0).chars().count(), METER_WIDTH);
    }

    #[test]
    fn status_line_shows_both_signals() {
        let line = status_line(true, 40.0);
        assert!(line.starts_with("AI speaking"));
        assert!(line.contains("40.00"));
        assert_eq!(line.chars().filter(|&c| c == '█').count(), 20);

        assert!(status_line(false, 0.0).starts_with("listening"));
    }
}
