//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound backend connection establishment
//! - Provide the idle deadline used by the relay loop
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from connect errors
//! - A zero idle timeout means "never"

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use crate::config::schema::TimeoutConfig;

/// Failure opening the backend connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connect to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },
    #[error("connect to {target} failed: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolved timeout settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// `None` disables the idle timeout.
    pub idle: Option<Duration>,
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_secs),
            idle: (config.idle_secs > 0).then(|| Duration::from_secs(config.idle_secs)),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

/// Open a TCP connection to `target` (`host:port`) within `timeout`.
pub async fn connect_with_timeout(target: &str, timeout: Duration) -> Result<TcpStream, ConnectError> {
    match time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ConnectError::Io {
            target: target.to_string(),
            source,
        }),
        Err(_) => Err(ConnectError::Timeout {
            target: target.to_string(),
            timeout,
        }),
    }
}

/// Deadline that moves forward on every activity.
#[derive(Debug)]
pub struct IdleDeadline {
    idle: Option<Duration>,
    deadline: Instant,
}

impl IdleDeadline {
    pub fn new(idle: Option<Duration>) -> Self {
        let mut deadline = Self {
            idle,
            deadline: Instant::now(),
        };
        deadline.touch();
        deadline
    }

    /// Record activity.
    pub fn touch(&mut self) {
        if let Some(idle) = self.idle {
            self.deadline = Instant::now() + idle;
        }
    }

    /// Resolves when the deadline passes; pending forever when disabled.
    pub async fn expired(&self) {
        match self.idle {
            Some(_) => time::sleep_until(self.deadline).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_idle_disables_timeout() {
        let timeouts = Timeouts::from(&TimeoutConfig {
            connect_secs: 2,
            idle_secs: 0,
        });
        assert_eq!(timeouts.connect, Duration::from_secs(2));
        assert_eq!(timeouts.idle, None);
        assert_eq!(Timeouts::default().idle, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn refused_connect_is_io_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect_with_timeout(&addr.to_string(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Io { .. }));
    }

    #[tokio::test]
    async fn idle_deadline_fires_after_quiet_period() {
        let deadline = IdleDeadline::new(Some(Duration::from_millis(50)));
        let fired = time::timeout(Duration::from_secs(5), deadline.expired()).await;
        assert!(fired.is_ok());
    }

    #[tokio::test]
    async fn disabled_deadline_never_fires() {
        let deadline = IdleDeadline::new(None);
        let fired = time::timeout(Duration::from_millis(200), deadline.expired()).await;
        assert!(fired.is_err());
    }
}
