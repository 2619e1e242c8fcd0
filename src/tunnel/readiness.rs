//! Readiness detection for tunnel processes.

use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::trace;

/// Diagnostic line ssh prints once forwarding is live.
pub const READY_MARKER: &str = "Entering interactive session";

/// Lines of diagnostic output kept for error reports.
const DIAGNOSTIC_LINES: usize = 20;

/// Decides whether a diagnostic line signals readiness.
pub trait ReadinessCheck: Send + Sync {
    /// True if `line` means the process is ready.
    fn is_ready(&self, line: &str) -> bool;
}

/// Matches a fixed substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerCheck {
    marker: String,
}

impl MarkerCheck {
    /// Match an arbitrary marker
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for MarkerCheck {
    fn default() -> Self {
        Self::new(READY_MARKER)
    }
}

impl ReadinessCheck for MarkerCheck {
    fn is_ready(&self, line: &str) -> bool {
        line.contains(&self.marker)
    }
}

/// How a bounded wait for readiness ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The check matched a line
    Ready,
    /// The stream closed first; carries the last diagnostic lines
    Closed(String),
    /// The deadline passed
    TimedOut,
}

/// Read `reader` line by line until the check matches, the stream ends, or
/// `deadline` elapses.
///
/// The reader is borrowed so the caller can keep draining it afterwards.
pub async fn wait_for_ready<R>(
    reader: &mut R,
    check: &dyn ReadinessCheck,
    deadline: Duration,
) -> Readiness
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut seen: Vec<String> = Vec::new();

    let scan = async {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => return Readiness::Closed(seen.join("\n")),
                Ok(_) => {
                    let trimmed = line.trim_end();
                    trace!(line = %trimmed, "tunnel");
                    if check.is_ready(trimmed) {
                        return Readiness::Ready;
                    }
                    if seen.len() == DIAGNOSTIC_LINES {
                        seen.remove(0);
                    }
                    seen.push(trimmed.to_string());
                }
                Err(e) => {
                    seen.push(format!("error reading diagnostics: {}", e));
                    return Readiness::Closed(seen.join("\n"));
                }
            }
        }
    };

    tokio::time::timeout(deadline, scan)
        .await
        .unwrap_or(Readiness::TimedOut)
}
