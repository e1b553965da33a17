//! Feeds recorded or live line-protocol input to an estimator.

use crate::estimator::TrackerMessage;
use crate::frame_decoder::InputLine;
use log::{debug, warn};
use spin_sleep::SpinSleeper;
use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Counts of what [`forward_lines`] did with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub forwarded: u64,
    pub skipped: u64,
    pub malformed: u64,
}

/// Forwards every decodable line of `input` to `output`.
///
/// Blank lines and lines starting with `#` are skipped; undecodable lines
/// are logged and skipped. With `realtime`, the thread sleeps between
/// frames for the difference of their timestamps, so a recording plays at
/// the pace it was captured. Returns when the input ends or the receiver
/// hangs up.
pub fn forward_lines<R: BufRead>(
    input: R,
    output: &Sender<TrackerMessage>,
    realtime: bool,
) -> io::Result<ReplayStats> {
    let sleeper = SpinSleeper::default();
    let mut stats = ReplayStats::default();
    let mut last_frame_ms: Option<f64> = None;

    for (number, line) in input.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            stats.skipped += 1;
            continue;
        }

        let decoded = match InputLine::from_str(trimmed) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Was unable to parse line {}: {}", number + 1, e);
                stats.malformed += 1;
                continue;
            }
        };

        if let InputLine::Frame { timestamp_ms, .. } = decoded {
            if realtime {
                if let Some(last) = last_frame_ms {
                    let gap = (timestamp_ms - last) / 1000.0;
                    if gap > 0.0 && gap.is_finite() {
                        sleeper.sleep(Duration::from_secs_f64(gap));
                    }
                }
            }
            last_frame_ms = Some(timestamp_ms);
        }

        debug!("Forwarding {:?}", decoded);
        if output.send(decoded.into_message()).is_err() {
            warn!("Estimator hung up after {} messages.", stats.forwarded);
            break;
        }
        stats.forwarded += 1;
    }

    Ok(stats)
}
