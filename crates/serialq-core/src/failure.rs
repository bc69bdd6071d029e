//! Failure taxonomy for queued actions.
//!
//! A work function either fails with its declared error type `E`
//! ([`Failure::Declared`]) or panics ([`Failure::Fault`]). The two never mix:
//! a panic is never reported as `E` and `E` is never widened into a fault.

use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::error::QueueError;

// ---------------------------------------------------------------------------
// Fault
// ---------------------------------------------------------------------------

/// An unrecoverable failure: the work function panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    message: String,
}

impl Fault {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    /// The panic message, or a placeholder for non-string payloads.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action panicked: {}", self.message)
    }
}

impl std::error::Error for Fault {}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// A captured failure, recorded on the action that produced it.
#[derive(Debug, Clone, Error)]
pub enum Failure<E> {
    #[error("{0}")]
    Declared(E),

    #[error(transparent)]
    Fault(Fault),
}

impl<E> Failure<E> {
    pub fn is_fault(&self) -> bool {
        matches!(self, Failure::Fault(_))
    }

    pub fn as_declared(&self) -> Option<&E> {
        match self {
            Failure::Declared(e) => Some(e),
            Failure::Fault(_) => None,
        }
    }

    pub fn into_declared(self) -> Option<E> {
        match self {
            Failure::Declared(e) => Some(e),
            Failure::Fault(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// WaitError
// ---------------------------------------------------------------------------

/// Why a blocking submit did not produce a value.
#[derive(Debug, Error)]
pub enum WaitError<E> {
    #[error(transparent)]
    Failed(#[from] Failure<E>),

    #[error("action was killed before it completed")]
    Killed,

    #[error("action finished without a value: result already taken or failure handled")]
    NoOutcome,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl<E> WaitError<E> {
    /// The declared error, if this wait failed with one.
    pub fn declared(&self) -> Option<&E> {
        match self {
            WaitError::Failed(f) => f.as_declared(),
            _ => None,
        }
    }

    pub fn into_declared(self) -> Option<E> {
        match self {
            WaitError::Failed(f) => f.into_declared(),
            _ => None,
        }
    }
}

/// Type-erased failure handed back to the worker loop, which cannot name `E`.
#[derive(Debug, Clone, Error)]
pub(crate) enum DispatchFailure {
    #[error("{0}")]
    Declared(String),

    #[error(transparent)]
    Fault(Fault),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_reads_str_and_string_payloads() {
        let f = Fault::from_panic(Box::new("boom"));
        assert_eq!(f.message(), "boom");
        let f = Fault::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(f.message(), "owned boom");
        let f = Fault::from_panic(Box::new(17_u32));
        assert_eq!(f.message(), "non-string panic payload");
    }

    #[test]
    fn failure_display_passes_through() {
        let declared: Failure<String> = Failure::Declared("NotFound".into());
        assert_eq!(declared.to_string(), "NotFound");
        assert!(!declared.is_fault());

        let fault: Failure<String> = Failure::Fault(Fault::from_panic(Box::new("bad")));
        assert_eq!(fault.to_string(), "action panicked: bad");
        assert!(fault.as_declared().is_none());
    }

    #[test]
    fn wait_error_exposes_declared() {
        let err: WaitError<String> = Failure::Declared("NotFound".to_string()).into();
        assert_eq!(err.declared().map(String::as_str), Some("NotFound"));
        assert!(WaitError::<String>::Killed.declared().is_none());
    }
}
