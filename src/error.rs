use thiserror::Error;

/// Taxonomy of failures the core can surface, independent of which
/// component raised them (spec §7).
#[derive(Debug, Error, Clone)]
pub enum ErrorKind {
    #[error("source file not found")]
    NotFound,

    #[error("hash failure: {0}")]
    HashFailure(String),

    #[error("move failure: {0}")]
    MoveFailure(String),

    #[error("verify mismatch after move")]
    VerifyMismatch,

    #[error("archive failure: {0}")]
    ArchiveFailure(String),

    #[error("queue full")]
    QueueFull,

    #[error("command exited non-zero: {0:?}")]
    CommandFailure(Option<i32>),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("discovery failure: {0}")]
    DiscoveryFailure(String),

    #[error("connection pool exhausted")]
    PoolExhausted,
}

impl ErrorKind {
    /// Whether a failure of this kind alone justifies a retry, per the
    /// remote-executor retry semantics (spec §4.F): transport and
    /// discovery problems are retried automatically; other kinds are
    /// only retried when the caller explicitly asked for `retries > 1`.
    pub fn is_transport_problem(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransportFailure(_) | ErrorKind::DiscoveryFailure(_) | ErrorKind::PoolExhausted
        )
    }

    /// Whether a Failed ingest item with this kind is eligible for
    /// re-enqueue (spec §7 "Surfaced" column).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::MoveFailure(_) | ErrorKind::VerifyMismatch)
    }
}

/// Crate-wide error type, one level above the per-module `*Error`
/// enums (`FileOpsError`, `QueueError`, `ProxyError`, `SshPoolError`,
/// `ExecutorError`) since those now cross module boundaries through
/// `SyncResult` and the orchestrator (spec §7). Mirrors the teacher's
/// per-module error + `#[from]` conversion idiom, promoted one level.
#[derive(Debug, Error)]
pub enum HomedError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("file operation error: {0}")]
    FileOps(#[from] crate::file_ops::FileOpsError),

    #[error("queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("proxy discovery error: {0}")]
    Proxy(#[from] crate::proxy::ProxyError),

    #[error("ssh pool error: {0}")]
    SshPool(#[from] crate::ssh_pool::SshPoolError),

    #[error("remote executor error: {0}")]
    Executor(#[from] crate::executor::ExecutorError),
}
