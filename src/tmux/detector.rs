use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use super::heuristics::{strip_ansi, trailing_lines, Classifier, Status, TRAILING_WINDOW};

type Fingerprint = [u8; 32];

/// Per-session memory carried between polls
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    fingerprint: Option<Fingerprint>,
    last_change: Option<Instant>,
    status: Status,
    /// Next observation only records a baseline and keeps `status`
    resumed: bool,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            fingerprint: None,
            last_change: None,
            status: Status::Idle,
            resumed: false,
        }
    }

    /// Continue from a status persisted by an earlier process
    pub fn resume(prior: Status) -> Self {
        Self {
            status: prior,
            resumed: true,
            ..Self::new()
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> Status {
        self.status
    }

    /// The session is gone or did not answer in time
    pub fn mark_absent(&mut self) -> Status {
        self.fingerprint = None;
        self.last_change = None;
        self.resumed = false;
        self.status = Status::Error;
        self.status
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Infers session status from successive pane captures
#[derive(Debug, Clone, Copy)]
pub struct StatusDetector {
    cooldown: Duration,
}

impl StatusDetector {
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    /// Classify one capture and record it in `tracker`
    pub fn observe(
        &self,
        tracker: &mut ActivityTracker,
        classifier: Classifier,
        capture: &str,
        now: Instant,
    ) -> Status {
        let resumed = std::mem::replace(&mut tracker.resumed, false);
        let content = strip_ansi(capture);

        if content.trim().is_empty() {
            tracker.fingerprint = None;
            tracker.last_change = Some(now);
            tracker.status = Status::Idle;
            return tracker.status;
        }

        let fingerprint = fingerprint(&content);
        let changed = tracker.fingerprint != Some(fingerprint);
        if changed {
            tracker.fingerprint = Some(fingerprint);
            tracker.last_change = Some(now);
        }

        let verdict = classifier.classify(&trailing_lines(&content, TRAILING_WINDOW));
        tracker.status = match verdict {
            Some(Status::Waiting) => Status::Waiting,
            Some(Status::Error) => Status::Error,
            _ if resumed => tracker.status,
            _ if changed => Status::Running,
            Some(status) => status,
            None => {
                let settled = tracker
                    .last_change
                    .is_some_and(|t| now.saturating_duration_since(t) >= self.cooldown);
                if settled {
                    Status::Idle
                } else {
                    tracker.status
                }
            }
        };
        tracker.status
    }
}

impl Default for StatusDetector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COOLDOWN)
    }
}

fn fingerprint(content: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.finalize().into()
}
