//! `serialq-core` — a priority-ordered, single-worker action queue.
//!
//! Many producer threads submit [`Action`]s; one worker per [`Queue`] runs them
//! one at a time, highest [`Priority`] first and FIFO within a priority. This
//! is the tool for funnelling mutations of shared state (a UI model, a cache,
//! a connection) through a single execution context without callers giving
//! up synchronous-call semantics.
//!
//! ```rust,no_run
//! use serialq_core::{Action, CancelToken, Priority, Queue};
//!
//! let queue = Queue::new("models")?;
//! let action = Action::from_fn(|_: &CancelToken| Ok::<_, String>(42));
//! action.set_priority(Priority::High);
//! assert_eq!(queue.add_and_wait(&action).unwrap(), 42);
//! # Ok::<(), serialq_core::QueueError>(())
//! ```

pub mod action;
pub mod cancel;
pub mod config;
pub mod error;
pub mod failure;
pub mod io;
pub mod priority;
pub mod queue;

pub use action::{Action, CallerInfo, FnAction, QueueAction};
pub use cancel::{CancelToken, Cancelled};
pub use config::{QueueConfig, ShutdownPolicy};
pub use error::{QueueError, Result};
pub use failure::{Failure, Fault, WaitError};
pub use priority::Priority;
pub use queue::{Queue, QueueStats};
