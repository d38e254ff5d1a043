use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DanError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient IO error: {0}")]
    TransientIo(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, DanError>;

/// Coarse error category, carried in batch reports where the error itself
/// has already been rendered to text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Validation,
    NotFound,
    TransientIo,
    Conflict,
}

impl DanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DanError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DanError::Validation(_) => ErrorKind::Validation,
            DanError::NotFound(_) => ErrorKind::NotFound,
            DanError::TransientIo(_) => ErrorKind::TransientIo,
            DanError::Conflict(_) => ErrorKind::Conflict,
        }
    }

    /// Storage and network failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DanError::TransientIo(_) | DanError::Conflict(_))
    }
}

impl From<rusqlite::Error> for DanError {
    fn from(err: rusqlite::Error) -> Self {
        DanError::TransientIo(format!("sqlite: {}", err))
    }
}

impl From<reqwest::Error> for DanError {
    fn from(err: reqwest::Error) -> Self {
        DanError::TransientIo(format!("http: {}", err))
    }
}

impl From<std::io::Error> for DanError {
    fn from(err: std::io::Error) -> Self {
        DanError::TransientIo(err.to_string())
    }
}

// Input documents are the only serde_json sources reaching `?` directly;
// stored rows map their decode errors to TransientIo at the call site.
impl From<serde_json::Error> for DanError {
    fn from(err: serde_json::Error) -> Self {
        DanError::Validation(format!("invalid JSON: {}", err))
    }
}
