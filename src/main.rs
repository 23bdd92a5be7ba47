use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use chorus_client::session::{CaptureSession, SilentSink, TurnScheduler};
use chorus_client::voice::{MicDevice, PLAYBACK_SAMPLE_RATE, SpeakerSink, WavClipFormat, play_raw};
use chorus_client::{
    Config, ConversationClient, Orchestrator, PlaybackEvent, PlaybackSink, SpokenLine,
    SubmitOutcome,
};

/// Chorus - voice client for multi-character conversations
#[derive(Parser)]
#[command(name = "chorus", version, about)]
struct Cli {
    /// Conversation service base URL
    #[arg(long)]
    server: Option<String>,

    /// Display name for your messages
    #[arg(short, long)]
    name: Option<String>,

    /// Conversation mode ("chat" or "debug")
    #[arg(long)]
    mode: Option<String>,

    /// Turns requested per submission
    #[arg(long)]
    turns: Option<u32>,

    /// Disable audio playback (turns are paced by estimated duration)
    #[arg(long)]
    no_audio: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Submit one message and play the resulting conversation
    Say {
        /// The message to submit
        message: String,
    },
    /// Ask one specific speaker to respond to the current history
    Trigger {
        /// Speaker ID
        speaker: u32,
    },
    /// Clear the service's conversational memory
    Reset,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,chorus_client=info",
        1 => "info,chorus_client=debug",
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
    let mut config = Config::load()?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(name) = cli.name {
        config.speaker_context = name;
    }
    if let Some(mode) = cli.mode {
        config.mode = mode.parse()?;
    }
    if let Some(turns) = cli.turns {
        config.turn_count = turns;
    }
    if cli.no_audio {
        config.audio_enabled = false;
    }

    // Hardware checks don't need the orchestrator stack
    if let Some(Command::TestMic { duration }) = &cli.command {
        return test_mic(&config, *duration).await;
    }
    if let Some(Command::TestSpeaker) = &cli.command {
        return test_speaker().await;
    }

    let sink: Arc<dyn PlaybackSink> = if config.audio_enabled {
        Arc::new(SpeakerSink::new())
    } else {
        Arc::new(SilentSink)
    };
    let (scheduler, mut events) = TurnScheduler::new(sink);
    let mut lines = scheduler.subscribe_lines();
    let capture = CaptureSession::new(
        Arc::new(MicDevice::new(config.capture_sample_rate)),
        Arc::new(WavClipFormat {
            sample_rate: config.capture_sample_rate,
        }),
    );
    let client = ConversationClient::new(&config.server_url)?;
    let orchestrator = Arc::new(Orchestrator::new(
        client,
        scheduler,
        capture,
        config.submission_context(),
    ));

    match cli.command {
        Some(Command::Say { message }) => {
            let outcome = orchestrator.submit_text(&message).await?;
            play_out(&config, outcome, &mut lines, &mut events).await;
        }
        Some(Command::Trigger { speaker }) => {
            let outcome = orchestrator.trigger_speaker(speaker).await?;
            play_out(&config, outcome, &mut lines, &mut events).await;
        }
        Some(Command::Reset) => {
            orchestrator.reset().await?;
            println!("conversation reset");
        }
        Some(Command::TestMic { .. } | Command::TestSpeaker) => unreachable!(),
        None => chat_loop(&config, &orchestrator, &mut lines, &mut events).await?,
    }

    Ok(())
}

/// Print displayed lines as they change until the session ends
async fn play_out(
    config: &Config,
    outcome: SubmitOutcome,
    lines: &mut watch::Receiver<Option<SpokenLine>>,
    events: &mut mpsc::UnboundedReceiver<PlaybackEvent>,
) {
    if let Some(transcription) = &outcome.transcription {
        println!("(you said: {transcription})");
    }
    if outcome.turns == 0 || outcome.superseded {
        return;
    }

    loop {
        tokio::select! {
            changed = lines.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = lines.borrow_and_update().clone();
                if let Some(line) = line {
                    println!("{}: {}", config.speaker_label(line.speaker_id), line.text);
                }
            }
            event = events.recv() => {
                match event {
                    Some(PlaybackEvent::TurnStarted { .. }) => {}
                    Some(PlaybackEvent::SessionEnded { .. }) => {
                        println!("(conversation ended)");
                        break;
                    }
                    Some(PlaybackEvent::Cancelled) | None => break,
                }
            }
        }
    }
}

/// Interactive loop: plain lines are submitted as messages, `/` commands
/// drive recording and playback control.
async fn chat_loop(
    config: &Config,
    orchestrator: &Arc<Orchestrator>,
    lines: &mut watch::Receiver<Option<SpokenLine>>,
    events: &mut mpsc::UnboundedReceiver<PlaybackEvent>,
) -> anyhow::Result<()> {
    println!("chorus connected to {}", config.server_url);
    println!("type a message, or /talk /done /stop /speaker <id> /reset /quit");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(text) = line? else { break };
                let text = text.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                if text == "/quit" {
                    break;
                }
                handle_input(config, orchestrator, &text).await;
            }
            changed = lines.changed() => {
                if changed.is_ok() {
                    let line = lines.borrow_and_update().clone();
                    if let Some(line) = line {
                        println!("{}: {}", config.speaker_label(line.speaker_id), line.text);
                    }
                }
            }
            event = events.recv() => {
                if let Some(PlaybackEvent::SessionEnded { .. }) = event {
                    println!("(conversation ended)");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel();
                break;
            }
        }
    }

    orchestrator.cancel();
    Ok(())
}

async fn handle_input(config: &Config, orchestrator: &Arc<Orchestrator>, text: &str) {
    match text {
        "/stop" => orchestrator.cancel(),
        "/reset" => {
            if let Err(e) = orchestrator.reset().await {
                eprintln!("reset failed: {e}");
            } else {
                println!("(conversation reset)");
            }
        }
        "/talk" => match orchestrator.start_recording().await {
            Ok(()) => println!("(recording, /done to send)"),
            Err(e) => eprintln!("could not start recording: {e}"),
        },
        "/done" => {
            let orchestrator = Arc::clone(orchestrator);
            tokio::spawn(async move {
                match orchestrator.stop_and_submit().await {
                    Ok(outcome) => {
                        if let Some(transcription) = outcome.transcription {
                            println!("(you said: {transcription})");
                        }
                    }
                    Err(e) => eprintln!("submission failed: {e}"),
                }
            });
        }
        command if command.starts_with("/speaker ") => {
            match command["/speaker ".len()..].trim().parse::<u32>() {
                Ok(id) => {
                    let orchestrator = Arc::clone(orchestrator);
                    tokio::spawn(async move {
                        if let Err(e) = orchestrator.trigger_speaker(id).await {
                            eprintln!("trigger failed: {e}");
                        }
                    });
                }
                Err(_) => eprintln!("usage: /speaker <id> (try {})", example_speakers(config)),
            }
        }
        command if command.starts_with('/') => {
            eprintln!("unknown command: {command}");
        }
        message => {
            let orchestrator = Arc::clone(orchestrator);
            let message = message.to_string();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.submit_text(&message).await {
                    eprintln!("submission failed: {e}");
                }
            });
        }
    }
}

fn example_speakers(config: &Config) -> String {
    if config.speaker_names.is_empty() {
        "1".to_string()
    } else {
        let mut ids: Vec<&String> = config.speaker_names.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    let capture = CaptureSession::new(
        Arc::new(MicDevice::new(config.capture_sample_rate)),
        Arc::new(WavClipFormat {
            sample_rate: config.capture_sample_rate,
        }),
    );
    capture.start_recording().await?;
    println!("recording for {duration}s...");
    tokio::time::sleep(Duration::from_secs(duration)).await;
    let clip = capture.stop_recording().await?;
    println!("captured {} bytes ({})", clip.data.len(), clip.content_type);
    Ok(())
}

async fn test_speaker() -> anyhow::Result<()> {
    // One second of 440 Hz
    let samples: Vec<f32> = (0..PLAYBACK_SAMPLE_RATE)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();
    println!("playing test tone...");
    play_raw(samples).await?;
    Ok(())
}
