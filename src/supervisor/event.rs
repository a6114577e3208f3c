//! Lifecycle events published by the supervisor

use std::time::Duration;

use crate::session::SessionId;
use crate::source::StreamProtocol;

/// Stream lifecycle events
///
/// Delivered over a broadcast channel; a subscriber that falls behind loses
/// the oldest events rather than slowing sessions down.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A decoder process was launched (initially or after a restart)
    Started {
        url: String,
        session_id: SessionId,
        protocol: StreamProtocol,
    },

    /// The decoder produced its first data
    Running { url: String, session_id: SessionId },

    /// The decoder stayed silent past its health threshold
    NoData {
        url: String,
        session_id: SessionId,
        waited: Duration,
    },

    /// The decoder exited or was declared dead
    Crashed {
        url: String,
        session_id: SessionId,
        exit_code: Option<i32>,
        restart_count: u32,
    },

    /// A restart is scheduled
    Restarting {
        url: String,
        session_id: SessionId,
        attempt: u32,
        delay: Duration,
    },

    /// The session was stopped on request
    Stopped { url: String, session_id: SessionId },

    /// The session gave up; it is no longer registered
    Failed {
        url: String,
        session_id: SessionId,
        reason: String,
    },
}

impl StreamEvent {
    /// Source URL the event is about
    pub fn url(&self) -> &str {
        match self {
            StreamEvent::Started { url, .. }
            | StreamEvent::Running { url, .. }
            | StreamEvent::NoData { url, .. }
            | StreamEvent::Crashed { url, .. }
            | StreamEvent::Restarting { url, .. }
            | StreamEvent::Stopped { url, .. }
            | StreamEvent::Failed { url, .. } => url,
        }
    }

    /// Session the event is about
    pub fn session_id(&self) -> SessionId {
        match self {
            StreamEvent::Started { session_id, .. }
            | StreamEvent::Running { session_id, .. }
            | StreamEvent::NoData { session_id, .. }
            | StreamEvent::Crashed { session_id, .. }
            | StreamEvent::Restarting { session_id, .. }
            | StreamEvent::Stopped { session_id, .. }
            | StreamEvent::Failed { session_id, .. } => *session_id,
        }
    }

    /// Whether the session is gone after this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Stopped { .. } | StreamEvent::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let event = StreamEvent::Crashed {
            url: "rtsp://cam/1".into(),
            session_id: 4,
            exit_code: Some(1),
            restart_count: 2,
        };

        assert_eq!(event.url(), "rtsp://cam/1");
        assert_eq!(event.session_id(), 4);
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_terminal_events() {
        let stopped = StreamEvent::Stopped {
            url: "rtmp://host/live/a".into(),
            session_id: 1,
        };
        let failed = StreamEvent::Failed {
            url: "rtmp://host/live/a".into(),
            session_id: 1,
            reason: "gave up".into(),
        };

        assert!(stopped.is_terminal());
        assert!(failed.is_terminal());
    }
}
