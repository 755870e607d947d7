// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {std::time::Duration, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum AptError {
    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("UTF-8 decoding error: {0:?}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("bad HTTP status {1} fetching {0}")]
    HttpStatus(String, u16),

    #[error("I/O error on {0}: {1:?}")]
    RepositoryIoPath(String, std::io::Error),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedUrlScheme(String),

    #[error("failed to fetch release file {0}: {1}")]
    ReleaseFetch(String, Box<AptError>),

    #[error("signature verification of {url} failed using keyring {keyring}")]
    ReleaseSignatureInvalid { url: String, keyring: String },

    #[error("malformed release file: {0}")]
    ReleaseMalformed(String),

    #[error("{0} is not listed in the signed release file; refusing to trust it")]
    PathNotTrusted(String),

    #[error("digest mismatch for {url}: expected {expected}, got {actual}")]
    HashMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("size mismatch for {url}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error("package integrity check failed for {url}: expected SHA256 {expected}, got {actual}")]
    PackageIntegrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("required field missing in package paragraph: {0}")]
    PackageRequiredFieldMissing(&'static str),

    #[error("invalid value for package field {0}: {1}")]
    PackageFieldInvalid(&'static str, String),

    #[error("failed to run {0}: {1:?}")]
    ToolInvocation(String, std::io::Error),

    #[error("{0} did not finish within {1:?}")]
    ToolTimeout(String, Duration),

    #[error("{0} failed: {1}")]
    ToolFailed(String, String),
}

impl AptError {
    /// Whether this error is the outcome of a failed trust check.
    pub fn is_trust_violation(&self) -> bool {
        matches!(
            self,
            Self::ReleaseSignatureInvalid { .. }
                | Self::ReleaseMalformed(_)
                | Self::PathNotTrusted(_)
                | Self::HashMismatch { .. }
                | Self::SizeMismatch { .. }
                | Self::PackageIntegrity { .. }
        )
    }

    /// Whether a failed compressed index fetch may be retried via the raw index.
    ///
    /// Only absence of the compressed file qualifies, which is a transport level
    /// failure or the path not being advertised by the release file. Content that
    /// was found but failed verification is never masked by a fallback.
    pub fn permits_index_fallback(&self) -> bool {
        match self {
            Self::NotFound(_)
            | Self::HttpStatus(..)
            | Self::RepositoryIoPath(..)
            | Self::Io(_)
            | Self::PathNotTrusted(_) => true,
            #[cfg(feature = "http")]
            Self::Http(_) => true,
            _ => false,
        }
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, AptError>;
