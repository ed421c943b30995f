//! Collection error taxonomy
//!
//! Transient failures never leave the fetch client: they are classified per
//! attempt as [`TransientReason`](super::fetch::TransientReason) and retried.
//! What surfaces here is a give-up, a bad payload, or a resource problem.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("Gave up on {url} after {attempts} attempts: {last_reason}")]
    Fatal {
        url: String,
        attempts: u32,
        last_reason: String,
    },

    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String },

    #[error("Input unavailable: {} - {reason}", path.display())]
    InputUnavailable { path: PathBuf, reason: String },

    #[error("Output unavailable: {}", path.display())]
    OutputUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot export {}: {reason}", path.display())]
    ExportFailed { path: PathBuf, reason: String },

    #[error("Invalid proxy endpoint '{endpoint}': {reason}")]
    InvalidProxy { endpoint: String, reason: String },

    #[error("Setup failed: {reason}")]
    Setup { reason: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl CollectionError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }

    pub fn input_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InputUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_item_context() {
        let err = CollectionError::Fatal {
            url: "https://shop.test/p/1".into(),
            attempts: 4,
            last_reason: "blocked (HTTP 403)".into(),
        };
        assert_eq!(
            err.to_string(),
            "Gave up on https://shop.test/p/1 after 4 attempts: blocked (HTTP 403)"
        );
        assert_eq!(
            CollectionError::input_unavailable("a.json", "missing").to_string(),
            "Input unavailable: a.json - missing"
        );
    }
}
