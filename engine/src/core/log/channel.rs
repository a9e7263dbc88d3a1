use crossbeam::channel::{Receiver, Sender, unbounded};
use log::{Level, Metadata, Record};

/// A single log record captured by a [`ChannelLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: Level,
    /// The module path or explicit target the record was logged under.
    pub target: String,
    pub message: String,
}

/// A `log::Log` implementation that forwards records over a channel. The receiving side is
/// drained by whatever owns presentation (an overlay, a console, a test).
pub struct ChannelLogger {
    sender: Sender<LogMessage>,
    max_level: Level,
}

impl log::Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // A dropped receiver just means nobody is listening anymore.
            let _ = self.sender.try_send(LogMessage {
                level: record.level(),
                target: record.target().to_string(),
                message: format!("{}", record.args()),
            });
        }
    }

    fn flush(&self) {}
}

impl ChannelLogger {
    pub fn new(sender: Sender<LogMessage>, max_level: Level) -> Self {
        Self { sender, max_level }
    }

    /// Build a logger together with the receiver for its records.
    pub fn with_receiver(max_level: Level) -> (Self, Receiver<LogMessage>) {
        let (sender, receiver) = unbounded();
        (Self::new(sender, max_level), receiver)
    }

    /// The most verbose level this logger accepts.
    pub fn max_level(&self) -> Level {
        self.max_level
    }
}
