//! Logging for the engine core.
//!
//! Everything in the crate logs through the `log` facade and never installs a logger on its
//! own. Applications pick a backend; [`install`] is the built-in choice that routes records
//! into a channel so a frontend can present them.

mod channel;

pub use channel::{ChannelLogger, LogMessage};

use crossbeam::channel::Receiver;
use log::{Level, SetLoggerError};

/// Install a [`ChannelLogger`] as the global logger and return the receiving side.
///
/// Fails if a global logger was already installed.
pub fn install(max_level: Level) -> Result<Receiver<LogMessage>, SetLoggerError> {
    let (logger, receiver) = ChannelLogger::with_receiver(max_level);
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(max_level.to_level_filter());
    Ok(receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installed_logger_receives_facade_records() {
        // Given
        let receiver = install(Level::Warn).unwrap();

        // When
        log::warn!(target: "terrain", "texture slots exhausted");

        // Then - other tests may log concurrently, so look for ours
        assert!(
            receiver
                .try_iter()
                .any(|m| m.target == "terrain" && m.message == "texture slots exhausted")
        );
        assert!(install(Level::Warn).is_err());
    }
}
