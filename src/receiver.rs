//! Completion contract: a producer reports exactly one of three outcomes.
//!
//! A [`Receiver`] is consumed by whichever completion it receives: a value,
//! a stop (cancellation), or an error. None of the three may panic; they run
//! on the completion path of an asynchronous operation.

use crate::exec_graph::ExecGraph;
use std::fmt;

/// Error payload delivered by graph producers.
pub type CompletionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The receiving end of one asynchronous operation.
pub trait Receiver: Sized {
    /// Payload of a successful completion.
    type Value;
    /// Payload of a failed completion.
    type Error;

    /// The operation succeeded.
    fn set_value(self, value: Self::Value);

    /// The operation was cancelled.
    fn set_stopped(self);

    /// The operation failed.
    fn set_error(self, error: Self::Error);
}

/// A receiver that lends its execution graph to the producer, which records
/// its work into that graph before completing.
pub trait GraphReceiver<'k>: Receiver {
    /// Graph the producer records into.
    fn graph(&mut self) -> &mut ExecGraph<'k>;
}

/// Which of the three outcomes a completion carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionKind {
    /// Success.
    Value,
    /// Cancellation.
    Stopped,
    /// Failure.
    Error,
}

impl fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionKind::Value => write!(f, "value"),
            CompletionKind::Stopped => write!(f, "stopped"),
            CompletionKind::Error => write!(f, "error"),
        }
    }
}

/// A discriminated outcome, for producers that compute it before delivery.
#[derive(Debug)]
pub enum Completion<V, E> {
    /// Success with its payload.
    Value(V),
    /// Cancellation.
    Stopped,
    /// Failure with its payload.
    Error(E),
}

impl<V, E> Completion<V, E> {
    /// The outcome without its payload.
    pub fn kind(&self) -> CompletionKind {
        match self {
            Completion::Value(_) => CompletionKind::Value,
            Completion::Stopped => CompletionKind::Stopped,
            Completion::Error(_) => CompletionKind::Error,
        }
    }
}

impl<V, E> From<Result<V, E>> for Completion<V, E> {
    fn from(result: Result<V, E>) -> Self {
        match result {
            Ok(value) => Completion::Value(value),
            Err(error) => Completion::Error(error),
        }
    }
}

/// Deliver `completion` to the matching handler of `receiver`.
pub fn complete<R: Receiver>(receiver: R, completion: Completion<R::Value, R::Error>) {
    match completion {
        Completion::Value(value) => receiver.set_value(value),
        Completion::Stopped => receiver.set_stopped(),
        Completion::Error(error) => receiver.set_error(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recorder<'a>(&'a RefCell<Vec<String>>);

    impl Receiver for Recorder<'_> {
        type Value = u32;
        type Error = &'static str;

        fn set_value(self, value: u32) {
            self.0.borrow_mut().push(format!("value {}", value));
        }

        fn set_stopped(self) {
            self.0.borrow_mut().push("stopped".to_string());
        }

        fn set_error(self, error: &'static str) {
            self.0.borrow_mut().push(format!("error {}", error));
        }
    }

    #[test]
    fn complete_dispatches_to_one_handler() {
        let log = RefCell::new(Vec::new());
        complete(Recorder(&log), Completion::Value(7));
        complete(Recorder(&log), Completion::Stopped);
        complete(Recorder(&log), Completion::Error("boom"));
        assert_eq!(*log.borrow(), vec!["value 7", "stopped", "error boom"]);
    }

    #[test]
    fn results_convert_to_completions() {
        let ok: Completion<u32, &str> = Ok(1).into();
        let err: Completion<u32, &str> = Err("bad").into();
        assert_eq!(ok.kind(), CompletionKind::Value);
        assert_eq!(err.kind(), CompletionKind::Error);
        assert_eq!(CompletionKind::Stopped.to_string(), "stopped");
    }
}
