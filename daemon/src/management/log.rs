use log::debug;
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

const LOG_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Fleet,
    Instance(u32),
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Fleet => f.write_str("fleet"),
            LogSource::Instance(id) => write!(f, "instance {}", id),
        }
    }
}

/// A human readable status line for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub source: LogSource,
    pub message: String,
}

/// Push side of the log channel.
///
/// One channel serves a whole fleet: instances get a clone tagged with their
/// own id, so every subscriber of the fleet sees instance events too.
#[derive(Clone)]
pub struct LogEmitter {
    tx: broadcast::Sender<LogEvent>,
    source: LogSource,
}

impl LogEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self {
            tx,
            source: LogSource::Fleet,
        }
    }

    pub fn for_instance(&self, id: u32) -> Self {
        Self {
            tx: self.tx.clone(),
            source: LogSource::Instance(id),
        }
    }

    pub fn source(&self) -> LogSource {
        self.source
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, message: impl Into<String>) {
        let event = LogEvent {
            source: self.source,
            message: message.into(),
        };
        // no subscribers is fine
        if self.tx.send(event).is_err() {
            debug!("log event from {} dropped, nobody is listening", self.source);
        }
    }
}

impl Default for LogEmitter {
    fn default() -> Self {
        Self::new()
    }
}
