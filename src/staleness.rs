//! Consumer-side detection of a tracker that stopped publishing.
//!
//! The transport itself never times out; a consumer feeds the sequence
//! number it observes into a [`StalenessWatchdog`] on every cycle and
//! decides what to do with stale data (normally: keep the last orientation).

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing has been published yet.
    Waiting,
    /// The sequence number advanced within the timeout.
    Fresh,
    /// The sequence number has not moved for `since`.
    Stale { since: Duration },
}

#[derive(Debug, Clone)]
pub struct StalenessWatchdog {
    timeout: Duration,
    last_sequence: i32,
    last_change: Option<Instant>,
}

impl StalenessWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_sequence: 0,
            last_change: None,
        }
    }

    /// Records the sequence number seen at `now` and classifies it.
    pub fn observe(&mut self, sequence: i32, now: Instant) -> Freshness {
        if sequence > 0 && sequence != self.last_sequence {
            self.last_sequence = sequence;
            self.last_change = Some(now);
            return Freshness::Fresh;
        }

        match self.last_change {
            None => Freshness::Waiting,
            Some(changed) => {
                let since = now.saturating_duration_since(changed);
                if since > self.timeout {
                    Freshness::Stale { since }
                } else {
                    Freshness::Fresh
                }
            }
        }
    }
}
