use std::any::Any;

use crossbeam::channel::{Receiver, TryRecvError};
use thiserror::Error;

/// Why a task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task panicked. Carries the panic message when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task never ran: the pool shut down first, or the result was already taken.
    #[error("task was abandoned before it ran")]
    Abandoned,
}

/// The eventual result of a task submitted with `run`.
///
/// The worker that executes the task fulfils the future exactly once.
pub struct TaskFuture<T> {
    receiver: Receiver<Result<T, TaskError>>,
}

impl<T> TaskFuture<T> {
    pub(super) fn new(receiver: Receiver<Result<T, TaskError>>) -> Self {
        Self { receiver }
    }

    /// Block until the task finishes and return its result.
    pub fn wait(self) -> Result<T, TaskError> {
        self.receiver.recv().unwrap_or(Err(TaskError::Abandoned))
    }

    /// Return the result if the task has finished, without blocking.
    ///
    /// `Ok(None)` means still running. Once a result has been returned, later calls report
    /// [`TaskError::Abandoned`].
    pub fn try_wait(&self) -> Result<Option<T>, TaskError> {
        match self.receiver.try_recv() {
            Ok(result) => result.map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TaskError::Abandoned),
        }
    }

    /// True once a result is waiting to be collected.
    pub fn is_ready(&self) -> bool {
        !self.receiver.is_empty()
    }
}

/// Extract a readable message from a panic payload.
pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
