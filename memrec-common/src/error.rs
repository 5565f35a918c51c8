//! Common error types for memrec

use thiserror::Error;

/// Common result type for memrec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the memrec binaries
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error (missing credential, bad TOML)
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport error (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error (wraps serde_json::Error)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Roster API returned a non-success response
    #[error("Roster API error: {0}")]
    Roster(String),

    /// Registry browser driver failure (protocol or script level)
    #[error("Registry driver error: {0}")]
    Registry(String),

    /// The browser window or session backing a page handle is gone
    #[error("Session handle closed: {0}")]
    SessionClosed(String),

    /// Credential-entry fields never appeared on the sign-in page
    #[error("Login form fields not found on sign-in page")]
    LoginFormNotFound,

    /// The registry rejected the configured credentials
    #[error("Sign-in rejected by registry (check credentials)")]
    InvalidCredentials,

    /// Member search input not found on the search surface
    #[error("Member search input not found")]
    SearchInputNotFound,

    /// Another run holds the status-file lock
    #[error("Another run is already in progress (pid {0})")]
    AlreadyRunning(u32),
}

impl Error {
    /// True for errors that mean the page handle must be replaced, not retried.
    pub fn is_session_closed(&self) -> bool {
        matches!(self, Error::SessionClosed(_))
    }
}
