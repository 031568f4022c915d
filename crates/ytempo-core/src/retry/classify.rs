//! Classify raw subprocess diagnostics into retry policy error kinds.

use std::fmt;

use super::policy::ErrorKind;

/// Longest raw-diagnostic prefix surfaced to the user for unknown errors.
const UNKNOWN_MESSAGE_CAP: usize = 200;

/// A raw failure normalized to a taxonomy entry.
///
/// Only `user_message` ever crosses the observer boundary; raw stderr and
/// stack traces stop here.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub user_message: String,
    pub retryable: bool,
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

impl std::error::Error for ClassifiedError {}

impl ClassifiedError {
    fn new(kind: ErrorKind, user_message: impl Into<String>) -> Self {
        Self {
            kind,
            user_message: user_message.into(),
            retryable: kind.is_retryable(),
        }
    }
}

/// Ordered pattern table: first match wins, so specific causes (private
/// video, age gate) must come before generic ones (network).
const PATTERNS: &[(&[&str], ErrorKind, &str)] = &[
    (
        &["cancelled by user", "canceled by user", "aborted by user"],
        ErrorKind::Cancelled,
        "Cancelled",
    ),
    (
        &["age-restricted", "age restricted", "confirm your age"],
        ErrorKind::AgeRestricted,
        "This video is age-restricted and cannot be downloaded",
    ),
    (
        &["private video", "video is private", "this video is private"],
        ErrorKind::SourcePrivate,
        "This video is private",
    ),
    (
        &[
            "video unavailable",
            "not available",
            "has been removed",
            "404",
            "not found",
        ],
        ErrorKind::SourceNotFound,
        "Video not found or no longer available",
    ),
    (
        &["429", "too many requests", "rate limit", "rate-limit"],
        ErrorKind::RateLimited,
        "The service is rate-limiting downloads; will slow down",
    ),
    (
        &["no space left", "disk full", "insufficient disk space", "enospc"],
        ErrorKind::DiskFull,
        "Not enough free disk space in the output folder",
    ),
    (
        &["ffmpeg", "atempo", "transcode"],
        ErrorKind::Transcode,
        "Audio conversion failed",
    ),
    (
        &["timed out", "timeout"],
        ErrorKind::Timeout,
        "The operation timed out",
    ),
    (
        &[
            "network",
            "connection",
            "getaddrinfo",
            "temporary failure in name resolution",
            "unable to download",
            "unreachable",
            "reset by peer",
        ],
        ErrorKind::Network,
        "Network error; check your connection",
    ),
];

/// Best-effort match of raw diagnostic text against the pattern table.
///
/// No match yields `ErrorKind::Unknown`, not retryable, with the raw text
/// truncated so oversized subprocess output never reaches the user.
pub fn classify(raw: &str) -> ClassifiedError {
    let haystack = raw.to_lowercase();
    for (needles, kind, message) in PATTERNS {
        if needles.iter().any(|n| haystack.contains(n)) {
            return ClassifiedError::new(*kind, *message);
        }
    }

    let mut message: String = raw.trim().chars().take(UNKNOWN_MESSAGE_CAP).collect();
    if message.is_empty() {
        message = "Download failed".to_string();
    }
    ClassifiedError::new(ErrorKind::Unknown, message)
}
