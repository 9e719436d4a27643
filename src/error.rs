// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the SCEP client.
//!
//! This module defines all error types that can occur during an enrollment
//! run: key and certificate generation, HTTP transport, pkiMessage decoding,
//! CA trust decisions, and artifact output.

use thiserror::Error;

/// Result type alias using [`ScepError`].
pub type Result<T> = std::result::Result<T, ScepError>;

/// Errors that can occur during SCEP client operations.
#[derive(Debug, Error)]
pub enum ScepError {
    /// Key pair generation failed or the key size is not supported.
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    /// Failed to build the bootstrap certificate or the CSR.
    #[error("Certificate build error: {0}")]
    CertificateBuild(String),

    /// HTTP request or response error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SCEP server returned a non-success HTTP status.
    #[error("Server error {status}: {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error message from server.
        message: String,
    },

    /// Response Content-Type header does not match any expected value.
    #[error("Invalid content-type: expected '{expected}', got '{actual}'")]
    InvalidContentType {
        /// Expected content-type.
        expected: String,
        /// Actual content-type received.
        actual: String,
    },

    /// Failed to parse an X.509 certificate.
    #[error("Certificate parsing error: {0}")]
    CertificateParsing(String),

    /// Malformed or unexpected pkiMessage / PKCS#7 structure.
    #[error("SCEP message error: {0}")]
    Message(String),

    /// Signature on a received pkiMessage did not verify.
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// The CA certificate was rejected by the configured trust decision.
    #[error("CA certificate not trusted: {0}")]
    CaNotTrusted(String),

    /// The CA answered a GetCRL request with a failure.
    #[error("Operation failed: {0}")]
    OperationFailure(String),

    /// Polling stopped after the configured number of attempts.
    #[error("Enrollment still pending after {attempts} poll attempt(s)")]
    PollLimitReached {
        /// Number of polls performed.
        attempts: u32,
    },

    /// The enrollment was cancelled while waiting.
    #[error("Enrollment cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid PEM data.
    #[error("Invalid PEM data: {0}")]
    InvalidPem(String),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScepError {
    /// Create a key generation error with the given message.
    pub fn key_generation(msg: impl Into<String>) -> Self {
        Self::KeyGeneration(msg.into())
    }

    /// Create a certificate build error with the given message.
    pub fn certificate_build(msg: impl Into<String>) -> Self {
        Self::CertificateBuild(msg.into())
    }

    /// Create a server error with status and message.
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid content-type error.
    pub fn invalid_content_type(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidContentType {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a certificate parsing error with the given message.
    pub fn certificate_parsing(msg: impl Into<String>) -> Self {
        Self::CertificateParsing(msg.into())
    }

    /// Create a pkiMessage error with the given message.
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    /// Create a signature verification error.
    pub fn signature(msg: impl Into<String>) -> Self {
        Self::Signature(msg.into())
    }

    /// Create a CA trust rejection error.
    pub fn ca_not_trusted(msg: impl Into<String>) -> Self {
        Self::CaNotTrusted(msg.into())
    }

    /// Create an operation failure error.
    pub fn operation_failure(msg: impl Into<String>) -> Self {
        Self::OperationFailure(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid PEM error.
    pub fn invalid_pem(msg: impl Into<String>) -> Self {
        Self::InvalidPem(msg.into())
    }

    /// Returns the HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerError { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Advisory hint for common CA-side misconfigurations.
    ///
    /// The hint never changes how the error is handled; it is printed next
    /// to the error message.
    pub fn hint(&self) -> Option<&'static str> {
        match self.status()? {
            400 => Some("Probably a template issue, look at the PKI log"),
            404 => Some("Invalid URL or CA identifier"),
            401 => Some("Probably an invalid end entity status on the CA"),
            _ => None,
        }
    }
}
