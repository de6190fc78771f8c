//! The `wait_for` resource precondition.
//!
//! A leaf task may declare `wait_for` as a string of space-separated
//! `key=value` tokens (`host`, `port`, `state`, `delay`, `file`). Parsing
//! and validation happen up front so a malformed precondition fails the
//! configuration before any subprocess starts; [`WaitFor::wait`] then
//! blocks until the resource reaches the desired state.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors from parsing or validating a `wait_for` spec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitForError {
    #[error("wait_for: malformed token '{0}', expected key=value")]
    MalformedToken(String),

    #[error("wait_for: unknown key '{0}'")]
    UnknownKey(String),

    #[error("wait_for: invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },

    #[error("wait_for: cannot use {0} and {1} at the same time")]
    Conflict(&'static str, &'static str),

    #[error("wait_for: {0} must be positive")]
    Negative(&'static str),

    #[error("wait_for: cannot use {0} without {1}")]
    Missing(&'static str, &'static str),

    #[error("wait_for: state does not support '{0}'")]
    UnknownState(String),

    #[error("wait_for: one of delay, port or file must be set")]
    Empty,
}

/// Desired state of the awaited resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Ready,
    Unready,
    Present,
    Absent,
}

impl WaitState {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(WaitState::Ready),
            "unready" => Some(WaitState::Unready),
            "present" => Some(WaitState::Present),
            "absent" => Some(WaitState::Absent),
            _ => None,
        }
    }

    /// Whether this state waits for the resource to exist/accept.
    fn is_positive(self) -> bool {
        matches!(self, WaitState::Ready | WaitState::Present)
    }
}

/// A parsed, not-yet-validated `wait_for` precondition.
///
/// Exactly one of delay, port, or file may be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaitFor {
    pub host: Option<String>,
    pub port: i32,
    pub file: Option<String>,
    pub state: Option<WaitState>,
    pub delay: f64,
}

impl WaitFor {
    /// Parse a `wait_for` string such as `"host=db port=5432 state=ready"`.
    ///
    /// The result is validated before it is returned.
    pub fn parse(spec: &str) -> Result<Self, WaitForError> {
        let mut w = WaitFor::default();
        for token in spec.split_whitespace() {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| WaitForError::MalformedToken(token.to_string()))?;
            match key {
                "host" => w.host = Some(value.to_string()),
                "port" => {
                    w.port = value.parse().map_err(|_| WaitForError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?;
                }
                "file" => w.file = Some(value.to_string()),
                "state" => {
                    w.state = Some(
                        WaitState::parse(value)
                            .ok_or_else(|| WaitForError::UnknownState(value.to_string()))?,
                    );
                }
                "delay" => {
                    w.delay = value.parse().map_err(|_| WaitForError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?;
                }
                other => return Err(WaitForError::UnknownKey(other.to_string())),
            }
        }
        w.validate()?;
        Ok(w)
    }

    /// Reject structurally invalid combinations.
    pub fn validate(&self) -> Result<(), WaitForError> {
        let has_port = self.port > 0;
        let has_file = self.file.as_deref().is_some_and(|f| !f.is_empty());
        let has_delay = self.delay > 0.0;

        if self.delay < 0.0 {
            return Err(WaitForError::Negative("delay"));
        }
        // try_from_secs_f64 also rejects NaN, which slips past both
        // sign comparisons above.
        if self.delay != 0.0 && Duration::try_from_secs_f64(self.delay).is_err() {
            return Err(WaitForError::InvalidValue {
                key: "delay".to_string(),
                value: self.delay.to_string(),
            });
        }
        if self.port < 0 {
            return Err(WaitForError::Negative("port"));
        }
        if has_port && has_file {
            return Err(WaitForError::Conflict("port", "file"));
        }
        if has_port && has_delay {
            return Err(WaitForError::Conflict("port", "delay"));
        }
        if has_file && has_delay {
            return Err(WaitForError::Conflict("file", "delay"));
        }
        if has_port && self.host.is_none() {
            return Err(WaitForError::Missing("port", "host"));
        }
        if self.host.is_some() && !has_port {
            return Err(WaitForError::Missing("host", "port"));
        }
        if has_port && self.state.is_none() {
            return Err(WaitForError::Missing("port", "state"));
        }
        if has_file && self.state.is_none() {
            return Err(WaitForError::Missing("file", "state"));
        }
        if !has_port && !has_file && !has_delay {
            return Err(WaitForError::Empty);
        }
        Ok(())
    }

    /// Block until the precondition holds.
    ///
    /// Delay sleeps a fixed duration; port polls a TCP connect every 10ms
    /// until the desired ready/unready state holds; file polls filesystem
    /// existence the same way.
    pub async fn wait(&self, task_name: &str) {
        if self.delay > 0.0 {
            info!("[{}] wait_for: {} seconds delay", task_name, self.delay);
            // validate() guarantees the delay is convertible.
            if let Ok(d) = Duration::try_from_secs_f64(self.delay) {
                sleep(d).await;
            }
            return;
        }

        // validate() guarantees state is present for port and file modes.
        let Some(state) = self.state else { return };

        if self.port > 0 {
            let host = self.host.as_deref().unwrap_or("localhost");
            info!(
                "[{}] wait_for: {}:{} {:?}",
                task_name, host, self.port, state
            );
            let addr = format!("{}:{}", host, self.port);
            loop {
                let connected = TcpStream::connect(&addr).await.is_ok();
                if connected == state.is_positive() {
                    return;
                }
                sleep(POLL_INTERVAL).await;
            }
        }

        if let Some(file) = self.file.as_deref().filter(|f| !f.is_empty()) {
            info!("[{}] wait_for: file {} {:?}", task_name, file, state);
            loop {
                let exists = Path::new(file).exists();
                if exists == state.is_positive() {
                    return;
                }
                sleep(POLL_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn parses_port_spec() {
        let w = WaitFor::parse("host=localhost port=5432 state=ready").unwrap();
        assert_eq!(w.host.as_deref(), Some("localhost"));
        assert_eq!(w.port, 5432);
        assert_eq!(w.state, Some(WaitState::Ready));
    }

    #[test]
    fn parses_delay_spec() {
        let w = WaitFor::parse("delay=1.5").unwrap();
        assert_eq!(w.delay, 1.5);
    }

    #[test]
    fn rejects_unknown_key() {
        let err = WaitFor::parse("socket=/tmp/x.sock").unwrap_err();
        assert_eq!(err, WaitForError::UnknownKey("socket".into()));
    }

    #[test]
    fn rejects_malformed_token() {
        let err = WaitFor::parse("delay").unwrap_err();
        assert_eq!(err, WaitForError::MalformedToken("delay".into()));
    }

    #[test]
    fn rejects_port_and_file_together() {
        let w = WaitFor {
            host: Some("localhost".into()),
            port: 80,
            file: Some("/tmp/flag".into()),
            state: Some(WaitState::Ready),
            delay: 0.0,
        };
        assert_eq!(w.validate(), Err(WaitForError::Conflict("port", "file")));
    }

    #[test]
    fn rejects_negative_delay() {
        let w = WaitFor {
            delay: -1.0,
            ..WaitFor::default()
        };
        assert_eq!(w.validate(), Err(WaitForError::Negative("delay")));
    }

    #[test]
    fn rejects_oversized_delay() {
        let err = WaitFor::parse("delay=1e300").unwrap_err();
        assert!(matches!(err, WaitForError::InvalidValue { ref key, .. } if key == "delay"));

        let err = WaitFor::parse("delay=inf").unwrap_err();
        assert!(matches!(err, WaitForError::InvalidValue { ref key, .. } if key == "delay"));
    }

    #[test]
    fn rejects_nan_delay() {
        let w = WaitFor {
            delay: f64::NAN,
            ..WaitFor::default()
        };
        assert!(matches!(
            w.validate(),
            Err(WaitForError::InvalidValue { ref key, .. }) if key == "delay"
        ));
    }

    #[test]
    fn rejects_negative_port() {
        let err = WaitFor::parse("host=localhost port=-1 state=ready").unwrap_err();
        assert_eq!(err, WaitForError::Negative("port"));
    }

    #[test]
    fn rejects_port_without_host() {
        let err = WaitFor::parse("port=80 state=ready").unwrap_err();
        assert_eq!(err, WaitForError::Missing("port", "host"));
    }

    #[test]
    fn rejects_port_without_state() {
        let err = WaitFor::parse("host=localhost port=80").unwrap_err();
        assert_eq!(err, WaitForError::Missing("port", "state"));
    }

    #[test]
    fn rejects_file_without_state() {
        let err = WaitFor::parse("file=/tmp/flag").unwrap_err();
        assert_eq!(err, WaitForError::Missing("file", "state"));
    }

    #[test]
    fn rejects_unknown_state() {
        let err = WaitFor::parse("file=/tmp/flag state=waiting").unwrap_err();
        assert_eq!(err, WaitForError::UnknownState("waiting".into()));
    }

    #[test]
    fn rejects_empty_spec() {
        let err = WaitFor::parse("").unwrap_err();
        assert_eq!(err, WaitForError::Empty);
    }

    #[tokio::test]
    async fn delay_waits_roughly_the_requested_time() {
        let w = WaitFor::parse("delay=0.05").unwrap();
        let start = Instant::now();
        w.wait("t").await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn port_wait_returns_once_listener_is_up() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let w = WaitFor::parse(&format!("host=127.0.0.1 port={} state=ready", port)).unwrap();
        w.wait("t").await;
    }

    #[tokio::test]
    async fn file_wait_returns_once_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flag");
        let w = WaitFor::parse(&format!("file={} state=present", path.display())).unwrap();

        let path_clone = path.clone();
        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            std::fs::write(&path_clone, b"ok").unwrap();
        });

        w.wait("t").await;
        writer.await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn file_wait_absent_returns_once_file_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flag");
        std::fs::write(&path, b"ok").unwrap();
        let w = WaitFor::parse(&format!("file={} state=absent", path.display())).unwrap();

        let path_clone = path.clone();
        let remover = tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            std::fs::remove_file(&path_clone).unwrap();
        });

        w.wait("t").await;
        remover.await.unwrap();
    }
}
