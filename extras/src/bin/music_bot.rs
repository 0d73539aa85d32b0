use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voicebot_sdk::{BotConfig, SessionEvent, VoiceManager};

const DEFAULT_CONFIG: &str = "voicebot.toml";
const DEFAULT_CHANNEL: u64 = 1;

struct Args {
    config: PathBuf,
    channel: u64,
    locators: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: PathBuf::from(DEFAULT_CONFIG),
        channel: DEFAULT_CHANNEL,
        locators: Vec::new(),
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                args.config = iter.next().ok_or("--config needs a path")?.into();
            }
            "--channel" => {
                args.channel = iter
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or("--channel needs a numeric id")?;
            }
            _ => args.locators.push(arg),
        }
    }
    if args.locators.is_empty() {
        return Err("nothing to play".to_string());
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Usage: music_bot [--config voicebot.toml] [--channel ID] <file or url>...");
            eprintln!("Example: music_bot --channel 42 intro.wav https://example.com/stream.mp3");
            std::process::exit(1);
        }
    };

    let config = BotConfig::load(&args.config)?.with_env_overrides();
    info!("Music bot starting, endpoint {}", config.endpoint.address);
    let user_id = config.endpoint.user_id;

    let manager = VoiceManager::new(config);
    let session = manager.join(args.channel);
    let events = session.events();

    let mut queued = 0usize;
    for locator in &args.locators {
        match session.enqueue(locator, user_id).await {
            Ok(id) => {
                info!("Queued {} as {}", locator, id);
                queued += 1;
            }
            Err(e) => warn!("Skipping {}: {}", locator, e),
        }
    }
    if queued == 0 {
        error!("None of the sources could be queued");
        manager.shutdown().await;
        return Ok(());
    }

    let mut done = 0usize;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Ok(event) = event else { break };
                match event {
                    SessionEvent::TrackStarted(track) => {
                        info!("Now playing {} (requested by {})", track, track.requested_by);
                        info!("\n{}", session.status().describe());
                    }
                    SessionEvent::TrackFinished(_) | SessionEvent::TrackSkipped(_) => done += 1,
                    SessionEvent::TrackFailed { track, error } => {
                        warn!("Could not play {}: {}", track, error);
                        done += 1;
                    }
                    SessionEvent::Reconnecting { attempt, delay } => {
                        warn!("Connection lost, retry {} in {:?}", attempt, delay);
                    }
                    SessionEvent::Connected { resumed } => info!("Connected (resumed: {})", resumed),
                    SessionEvent::Left(reason) => {
                        info!("Left the channel: {:?}", reason);
                        break;
                    }
                }
                if done >= queued {
                    info!("Queue finished");
                    break;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let status = session.status();
    info!("Sent {} frames", status.frames_sent);
    manager.shutdown().await;
    Ok(())
}
