/// Error type for memwatch operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {context} (got {value})")]
    InvalidArgument { context: String, value: String },

    #[error("Memory monitor is not running")]
    NotRunning,

    #[error("No memory snapshot has been recorded yet")]
    NoSnapshot,

    #[error("Sampling failed: {0}")]
    Sampling(String),

    #[error("Panic during sampling cycle: {0}")]
    Panicked(String),

    #[error("Feature not available: {0}")]
    NotAvailable(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_argument<C: Into<String>, V: ToString>(context: C, value: V) -> Self {
        Error::InvalidArgument { context: context.into(), value: value.to_string() }
    }

    /// Wraps a sampler failure. Public so that custom samplers can report
    /// errors in the crate's own vocabulary.
    pub fn sampling<S: Into<String>>(msg: S) -> Self {
        Error::Sampling(msg.into())
    }

    pub(crate) fn not_available<S: Into<String>>(msg: S) -> Self {
        Error::NotAvailable(msg.into())
    }

    #[allow(dead_code)]
    pub(crate) fn invalid_data<S: Into<String>>(msg: S) -> Self {
        Error::InvalidData(msg.into())
    }

    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Builds an [`Error::Panicked`] from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Error::Panicked(panic_message(payload.as_ref()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::config(err.to_string())
    }
}

/// Best-effort extraction of the message carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Result type for memwatch operations
pub type Result<T> = std::result::Result<T, Error>;
