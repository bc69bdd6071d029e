use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue '{0}' is shut down")]
    ShutDown(String),

    #[error("action is already pending on a queue")]
    AlreadyQueued,

    #[error("action has already finished: reset it before resubmitting")]
    AlreadyFinished,

    #[error("action is currently executing")]
    ActionBusy,

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("invalid shutdown policy: {0}")]
    InvalidShutdownPolicy(String),

    #[error("invalid queue name '{0}': must be non-empty and contain no NUL bytes")]
    InvalidName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
