// Error handling module
// Failure classification for an export run and the outcome reported to callers

use thiserror::Error;

/// Errors that abort an export run
#[derive(Error, Debug)]
pub enum ExportError {
    /// Login endpoint reported `success: false` (strict mode only)
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Login call failed in transport or returned an unparseable body
    #[error("Login failed: {0:#}")]
    Login(anyhow::Error),

    /// Export request was not accepted
    #[error("Export request rejected: {status} - {body}")]
    SubmitRejected { status: u16, body: String },

    /// Progress check returned something other than 200
    #[error("Export not ready: progress check returned {status}")]
    ProgressNotReady { status: u16 },

    /// No successful progress check within the attempt budget
    #[error("Export did not complete after {attempts} progress checks")]
    PollTimeout { attempts: u32 },

    /// Package download returned a non-200 status or failed in transport
    #[error("Download failed: {0}")]
    DownloadFailure(String),

    /// Transport error outside the download step
    #[error("HTTP request failed: {message} (kind: {kind})")]
    Transport { kind: &'static str, message: String },

    /// Writing the package failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// Classify a reqwest error the way request logs label it
    pub fn transport(e: &reqwest::Error) -> Self {
        ExportError::Transport {
            kind: error_kind(e),
            message: e.to_string(),
        }
    }
}

/// Short label for a transport error
pub fn error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, ExportError>;

/// Final result of an export run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub success: bool,
    pub error_detail: Option<String>,
}

impl ExportOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            error_detail: Some(detail.into()),
        }
    }
}
