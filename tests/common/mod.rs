//! Shared fixtures for supervisor integration tests
//!
//! The fake decoders are small shell scripts that accept the ffmpeg command
//! line, record it, and then behave like a decoder would: stream silence,
//! crash, or hang. Every script is written once, before any test spawns a
//! process, so no script is ever executed while a write handle is open.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use audio_ingest::protocol::{HealthConfig, HealthTimeouts};
use audio_ingest::{RestartPolicy, SessionState, StreamEvent, StreamSupervisor, SupervisorConfig};
use tokio::sync::broadcast;

/// Generous upper bound for anything the tests wait on
pub const WAIT: Duration = Duration::from_secs(15);

/// Behavior of a fake decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    /// 100 ms of silence every 50 ms until killed
    Streaming,
    /// Never writes anything
    Silent,
    /// One frame, then exit 7
    Crash,
    /// Crash with exit 3 on the first launch for a URL, stream afterwards
    Flaky,
    /// Like `Streaming`, but ignores SIGTERM and only dies to SIGKILL
    Stubborn,
}

impl Decoder {
    const ALL: [Decoder; 5] = [
        Decoder::Streaming,
        Decoder::Silent,
        Decoder::Crash,
        Decoder::Flaky,
        Decoder::Stubborn,
    ];

    fn file_name(&self) -> &'static str {
        match self {
            Decoder::Streaming => "streaming.sh",
            Decoder::Silent => "silent.sh",
            Decoder::Crash => "crash.sh",
            Decoder::Flaky => "flaky.sh",
            Decoder::Stubborn => "stubborn.sh",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            Decoder::Streaming => STREAM_FOREVER,
            Decoder::Silent => "exec sleep 30\n",
            Decoder::Crash => "head -c 9600 /dev/zero\nexit 7\n",
            Decoder::Flaky => {
                "if [ \"$launch\" -le 1 ]; then\n  head -c 9600 /dev/zero\n  exit 3\nfi\n\
                 while :; do\n  head -c 9600 /dev/zero || exit 0\n  sleep 0.05\ndone\n"
            }
            Decoder::Stubborn => {
                "trap '' TERM\n\
                 while :; do\n  head -c 9600 /dev/zero || exit 0\n  sleep 0.05\ndone\n"
            }
        }
    }
}

const STREAM_FOREVER: &str = "while :; do\n  head -c 9600 /dev/zero || exit 0\n  sleep 0.05\ndone\n";

/// Records each launch under a key derived from the input URL
const PRELUDE: &str = r#"url=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then url="$arg"; fi
  prev="$arg"
done
key=$(printf '%s' "$url" | tr -c 'A-Za-z0-9' '_')
echo "$*" >> "$STATE/$key.args"
echo "$$" >> "$STATE/$key.pids"
launch=$(( $(wc -l < "$STATE/$key.args") ))
"#;

/// Directory holding the fake decoders and their launch records
pub struct FakeDecoders {
    dir: PathBuf,
}

impl FakeDecoders {
    fn install() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("fake-decoders")
            .tempdir()
            .expect("create fixture dir")
            .into_path();
        let state = dir.join("state");
        fs::create_dir_all(&state).expect("create state dir");

        for decoder in Decoder::ALL {
            let script = format!(
                "#!/bin/sh\nSTATE='{}'\n{}{}",
                state.display(),
                PRELUDE,
                decoder.body()
            );
            let path = dir.join(decoder.file_name());
            fs::write(&path, script).expect("write fake decoder");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake decoder");
        }

        Self { dir }
    }

    /// Executable for a decoder behavior
    pub fn path(&self, decoder: Decoder) -> PathBuf {
        self.dir.join(decoder.file_name())
    }

    fn record(&self, url: &str, ext: &str) -> PathBuf {
        let key: String = url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join("state").join(format!("{key}.{ext}"))
    }

    fn lines(&self, url: &str, ext: &str) -> Vec<String> {
        fs::read_to_string(self.record(url, ext))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Number of decoder processes launched for `url`
    pub fn launches(&self, url: &str) -> usize {
        self.lines(url, "args").len()
    }

    /// Command line of each launch for `url`
    pub fn args(&self, url: &str) -> Vec<String> {
        self.lines(url, "args")
    }

    /// Process ids of each launch for `url`
    pub fn pids(&self, url: &str) -> Vec<i32> {
        self.lines(url, "pids")
            .iter()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    /// Wait until `url` has been launched at least `count` times
    pub async fn wait_launches(&self, url: &str, count: usize) {
        let reached = tokio::time::timeout(WAIT, async {
            while self.launches(url) < count {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "{url} launched {} times, expected {count}", self.launches(url));
    }
}

/// Shared fixture; installs the scripts on first use
pub fn fixture() -> &'static FakeDecoders {
    static FIXTURE: OnceLock<FakeDecoders> = OnceLock::new();
    FIXTURE.get_or_init(FakeDecoders::install)
}

/// Log to the test harness when `RUST_LOG` is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Supervisor settings tuned for fast tests
pub fn config(decoder: Decoder) -> SupervisorConfig {
    SupervisorConfig::default()
        .decoder_path(fixture().path(decoder))
        .stop_grace_period(Duration::from_secs(2))
        .health(HealthConfig::uniform(HealthTimeouts::new(
            Duration::from_secs(5),
            Duration::from_secs(3),
        )))
        .restart_policy(RestartPolicy::fixed(Duration::from_millis(100), 3))
}

/// A unique URL for `protocol` ("rtsp", "rtmp" or "hls")
pub fn url(protocol: &str, name: &str) -> String {
    match protocol {
        "rtsp" => format!("rtsp://127.0.0.1:8554/{name}"),
        "rtmp" => format!("rtmp://127.0.0.1:1935/live/{name}"),
        "hls" => format!("http://127.0.0.1:8080/{name}/index.m3u8"),
        other => panic!("unknown protocol {other}"),
    }
}

/// Wait for the first event matching `predicate`
pub async fn next_event(
    events: &mut broadcast::Receiver<StreamEvent>,
    predicate: impl Fn(&StreamEvent) -> bool,
) -> StreamEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait until the session for `url` reaches `state`
pub async fn wait_for_state(supervisor: &StreamSupervisor, url: &str, state: SessionState) {
    let mut rx = supervisor
        .watch_state(url)
        .await
        .unwrap_or_else(|| panic!("no session for {url}"));
    let reached = tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .map(|r| r.is_ok());
    assert!(
        matches!(reached, Ok(true)),
        "{url} did not reach {state}, last state {}",
        *rx.borrow()
    );
}

/// Whether a process id is still alive
pub fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

