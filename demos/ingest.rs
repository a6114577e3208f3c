//! Ingest demo
//!
//! Starts every stream given on the command line and logs its audio level.
//! Each argument is either a URL or a JSON stream definition:
//!
//! ```text
//! cargo run --example ingest -- rtsp://camera.local/stream1 \
//!     '{"name":"yard","url":"rtmp://localhost/live/yard","type":"rtmp"}'
//! ```
//!
//! Set `FFMPEG` to use a decoder outside `PATH` and `RUST_LOG` to tune logging.
//! Stops everything on Ctrl+C.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use audio_ingest::{StreamConfig, StreamEvent, StreamSupervisor, SupervisorConfig};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const LEVEL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,audio_ingest=debug")),
        )
        .init();

    let streams: Vec<StreamConfig> = std::env::args()
        .skip(1)
        .map(|arg| parse_stream(&arg))
        .collect::<Result<_, _>>()?;

    if streams.is_empty() {
        eprintln!("usage: ingest <url | json stream definition>...");
        std::process::exit(2);
    }

    let mut config = SupervisorConfig::default();
    if let Ok(path) = std::env::var("FFMPEG") {
        config = config.decoder_path(path);
    }

    let supervisor = StreamSupervisor::with_config(config);
    let mut events = supervisor.subscribe_events();
    let (tx, mut frames) = mpsc::channel(256);

    for stream in &streams {
        match supervisor.start_configured(stream, tx.clone()).await {
            Ok(outcome) => tracing::info!(
                name = %stream.name,
                session_id = outcome.session_id(),
                "Stream started"
            ),
            Err(e) => tracing::error!(name = %stream.name, error = %e, "Failed to start stream"),
        }
    }
    drop(tx);

    let mut last_logged: HashMap<String, Instant> = HashMap::new();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let due = last_logged
                    .get(&*frame.source)
                    .map_or(true, |t| t.elapsed() >= LEVEL_INTERVAL);
                if due {
                    tracing::info!(
                        stream = %frame.source,
                        sequence = frame.sequence,
                        level_dbfs = format_args!("{:.1}", frame.rms_dbfs()),
                        "Audio level"
                    );
                    last_logged.insert(frame.source.to_string(), Instant::now());
                }
            }
            event = events.recv() => {
                match event {
                    Ok(StreamEvent::Failed { url, reason, .. }) => {
                        tracing::error!(stream = %url, reason = %reason, "Stream failed");
                    }
                    Ok(event) => tracing::debug!(event = ?event, "Stream event"),
                    Err(e) => tracing::warn!(error = %e, "Event stream lagged"),
                }
            }
        }
    }

    for snapshot in supervisor.all_stats().await {
        tracing::info!(
            stream = %snapshot.url,
            state = %snapshot.state,
            frames = snapshot.frames_delivered,
            restarts = snapshot.restart_count,
            "Final stream stats"
        );
    }

    supervisor.shutdown().await;
    Ok(())
}

fn parse_stream(arg: &str) -> Result<StreamConfig, serde_json::Error> {
    if arg.trim_start().starts_with('{') {
        return serde_json::from_str(arg);
    }
    Ok(StreamConfig {
        name: arg.to_string(),
        url: arg.to_string(),
        stream_type: String::new(),
        transport: String::new(),
    })
}
