//! JSON-lines telemetry source
//!
//! Each line holds either a telemetry event as pushed by the game
//! connection or a lead-in marker:
//!
//! ```text
//! {"leadIn": 412.0}
//! {"athleteId": 7, "athlete": {"ftp": 250}, "state": {"distance": 1500, "power": 240, "speed": 35}, "wBal": 18000}
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::TelemetryError;
use crate::models::{RawTelemetry, TelemetrySample};
use crate::runner::SessionEvent;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Record {
    LeadIn {
        #[serde(rename = "leadIn")]
        lead_in: f64,
    },
    Telemetry(RawTelemetry),
}

/// Counters for one replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub lines: u64,
    pub events: u64,
    pub skipped: u64,
}

/// Decode one line; blank lines yield `None`
pub fn parse_line(line: &str) -> Result<Option<SessionEvent>, TelemetryError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let record: Record = serde_json::from_str(line).map_err(|e| TelemetryError::Malformed {
        reason: e.to_string(),
    })?;

    match record {
        Record::LeadIn { lead_in } => {
            if !lead_in.is_finite() {
                return Err(TelemetryError::NonFinite { field: "leadIn" });
            }
            Ok(Some(SessionEvent::LeadIn(lead_in)))
        }
        Record::Telemetry(raw) => Ok(Some(SessionEvent::Tick(TelemetrySample::try_from(raw)?))),
    }
}

/// Open a telemetry file, or stdin for `-`
pub async fn open(path: &str) -> std::io::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(Path::new(path)).await?;
    Ok(Box::new(BufReader::new(file)))
}

/// Feed every decodable line of `reader` into `events`
///
/// Malformed lines are logged and skipped. With `pace` set, consecutive
/// ticks are spaced by that interval to mimic the live feed. Stops early
/// if the receiving side goes away.
pub async fn replay<R>(
    reader: R,
    events: mpsc::Sender<SessionEvent>,
    pace: Option<Duration>,
) -> std::io::Result<ReplayStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = ReplayStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        stats.lines += 1;

        let event = match parse_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                stats.skipped += 1;
                warn!(line = stats.lines, error = %e, "Skipping telemetry line");
                continue;
            }
        };

        let is_tick = matches!(event, SessionEvent::Tick(_));
        if events.send(event).await.is_err() {
            debug!("Event receiver dropped, stopping replay");
            break;
        }
        stats.events += 1;

        if let (true, Some(pace)) = (is_tick, pace) {
            tokio::time::sleep(pace).await;
        }
    }

    Ok(stats)
}
