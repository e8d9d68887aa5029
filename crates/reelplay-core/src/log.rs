// crates/reelplay-core/src/log.rs
//
// Categorized log sink. Systems report through the context's LogSystem;
// entries carry a timestamp (seconds since the system started), a prefix
// naming the module, and a kind. Items fan out on an observable and are
// forwarded to `tracing`; no subscriber is installed here.

use std::sync::Mutex;
use std::time::Instant;

use crate::observer::{Observable, Subscription};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogKind {
    #[default]
    Status,
    Warning,
    Error,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogItem {
    /// Seconds since the log system started.
    pub time: f64,
    pub prefix: String,
    pub message: String,
    pub kind: LogKind,
}

impl std::fmt::Display for LogItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            LogKind::Status => write!(f, "{:.2} {}: {}", self.time, self.prefix, self.message),
            LogKind::Warning => {
                write!(f, "{:.2} {}: Warning: {}", self.time, self.prefix, self.message)
            }
            LogKind::Error => {
                write!(f, "{:.2} {}: ERROR: {}", self.time, self.prefix, self.message)
            }
        }
    }
}

pub struct LogSystem {
    start: Instant,
    state: Mutex<State>,
}

struct State {
    observable: Observable<LogItem>,
    recent: Vec<LogItem>,
}

/// How many items `recent()` retains.
const RECENT_MAX: usize = 100;

impl LogSystem {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            state: Mutex::new(State {
                observable: Observable::new(LogItem::default()),
                recent: Vec::new(),
            }),
        }
    }

    pub fn print(&self, prefix: &str, message: &str, kind: LogKind) {
        let item = LogItem {
            time: self.start.elapsed().as_secs_f64(),
            prefix: prefix.to_string(),
            message: message.to_string(),
            kind,
        };
        match kind {
            LogKind::Status => tracing::info!(target: "reelplay", "{prefix}: {message}"),
            LogKind::Warning => tracing::warn!(target: "reelplay", "{prefix}: {message}"),
            LogKind::Error => tracing::error!(target: "reelplay", "{prefix}: {message}"),
        }
        let mut state = self.state.lock().unwrap();
        state.recent.push(item.clone());
        if state.recent.len() > RECENT_MAX {
            state.recent.remove(0);
        }
        state.observable.set_always(item);
    }

    pub fn status(&self, prefix: &str, message: &str) {
        self.print(prefix, message, LogKind::Status);
    }

    pub fn warning(&self, prefix: &str, message: &str) {
        self.print(prefix, message, LogKind::Warning);
    }

    pub fn error(&self, prefix: &str, message: &str) {
        self.print(prefix, message, LogKind::Error);
    }

    pub fn observe(&self) -> Subscription<LogItem> {
        self.state.lock().unwrap().observable.observe()
    }

    /// The most recent items, oldest first.
    pub fn recent(&self) -> Vec<LogItem> {
        self.state.lock().unwrap().recent.clone()
    }
}

impl Default for LogSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_carry_kind_and_prefix() {
        let log = LogSystem::new();
        let sub = log.observe();
        sub.drain();
        log.warning("timeline", "slow read");
        let item = sub.latest().unwrap();
        assert_eq!(item.kind, LogKind::Warning);
        assert_eq!(item.prefix, "timeline");
        assert!(item.to_string().contains("Warning: slow read"));
    }

    #[test]
    fn recent_is_bounded() {
        let log = LogSystem::new();
        for i in 0..(RECENT_MAX + 10) {
            log.status("test", &format!("item {i}"));
        }
        let recent = log.recent();
        assert_eq!(recent.len(), RECENT_MAX);
        assert_eq!(recent.last().unwrap().message, format!("item {}", RECENT_MAX + 9));
    }
}
