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

//! Configuration types for the SCEP client.
//!
//! [`ScepClientConfig`] configures the HTTP transport. [`EnrollmentConfig`]
//! describes one enrollment run and can be loaded from a TOML file:
//!
//! ```toml
//! [server]
//! url = "http://ca.example.com/scep/pkiclient.exe"
//! ca_identifier = "ManagementCA"
//!
//! [certificate]
//! subject = "CN=device01,O=Example"
//! challenge = "secret"
//! key_size = 2048
//!
//! [trust]
//! mode = "fingerprint"
//! fingerprint = "AB:CD:..."
//!
//! [output]
//! certificate_file = "device01.pem"
//! key_file = "device01-key.pem"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ScepError};
use crate::keygen::DEFAULT_KEY_SIZE;
use crate::trust::{CaTrust, parse_fingerprint};

/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay between GetCertInitial polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a SCEP transport.
#[derive(Debug, Clone)]
pub struct ScepClientConfig {
    /// SCEP endpoint URL (e.g., "http://ca.example.com/scep/pkiclient.exe").
    pub server_url: Url,

    /// CA identifier sent as the `message` of GetCACert / GetCACaps.
    pub ca_identifier: Option<String>,

    /// Request timeout duration.
    pub timeout: Duration,

    /// Additional HTTP headers to include in requests.
    pub additional_headers: Vec<(String, String)>,
}

impl ScepClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ScepClientConfigBuilder {
        ScepClientConfigBuilder::new()
    }

    /// Build the URL for a SCEP operation.
    ///
    /// The operation and optional message are carried as query parameters
    /// on the configured endpoint.
    pub fn build_url(&self, operation: &str, message: Option<&str>) -> Url {
        let mut url = self.server_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("operation", operation);
            if let Some(message) = message {
                query.append_pair("message", message);
            }
        }
        url
    }
}

/// Builder for [`ScepClientConfig`].
#[derive(Default)]
pub struct ScepClientConfigBuilder {
    server_url: Option<Url>,
    ca_identifier: Option<String>,
    timeout: Option<Duration>,
    additional_headers: Vec<(String, String)>,
}

impl ScepClientConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SCEP server URL.
    pub fn server_url(mut self, url: impl AsRef<str>) -> std::result::Result<Self, url::ParseError> {
        self.server_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Set the CA identifier.
    pub fn ca_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.ca_identifier = Some(identifier.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add an additional HTTP header to all requests.
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.push((name.into(), value.into()));
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is not set.
    pub fn build(self) -> std::result::Result<ScepClientConfig, &'static str> {
        let server_url = self.server_url.ok_or("server_url is required")?;

        Ok(ScepClientConfig {
            server_url,
            ca_identifier: self.ca_identifier.filter(|id| !id.is_empty()),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            additional_headers: self.additional_headers,
        })
    }
}

/// Complete description of one enrollment run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrollmentConfig {
    /// SCEP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Requested certificate.
    #[serde(default)]
    pub certificate: CertificateConfig,

    /// CA trust decision.
    #[serde(default)]
    pub trust: TrustConfig,

    /// Pending-state polling.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Artifact output.
    #[serde(default)]
    pub output: OutputConfig,
}

/// SCEP server section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// SCEP endpoint URL.
    #[serde(default)]
    pub url: String,

    /// CA identifier.
    pub ca_identifier: Option<String>,

    /// HTTP timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// Certificate section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateConfig {
    /// Subject distinguished name.
    #[serde(default)]
    pub subject: String,

    /// Challenge password.
    pub challenge: Option<String>,

    /// RSA key size in bits.
    #[serde(default = "default_key_size")]
    pub key_size: usize,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            subject: String::new(),
            challenge: None,
            key_size: DEFAULT_KEY_SIZE,
        }
    }
}

fn default_key_size() -> usize {
    DEFAULT_KEY_SIZE
}

/// How the CA certificate is trusted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrustMode {
    /// Require a pinned SHA-256 fingerprint.
    #[default]
    Fingerprint,
    /// Accept any CA certificate.
    Insecure,
}

/// Trust section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustConfig {
    /// Trust mode.
    #[serde(default)]
    pub mode: TrustMode,

    /// Expected CA certificate fingerprint (hex, colons optional).
    pub fingerprint: Option<String>,
}

/// Polling section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    /// Seconds between polls.
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,

    /// Give up after this many polls; unbounded when absent.
    pub max_attempts: Option<u32>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            max_attempts: None,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

/// Output section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Append the CSR here.
    pub csr_file: Option<PathBuf>,

    /// Append the CA certificates here.
    pub ca_certificate_file: Option<PathBuf>,

    /// Append the issued certificates here.
    pub certificate_file: Option<PathBuf>,

    /// Append the private key here.
    pub key_file: Option<PathBuf>,

    /// Append the CRL here.
    pub crl_file: Option<PathBuf>,

    /// Print every artifact as titled PEM text.
    #[serde(default)]
    pub text: bool,
}

impl EnrollmentConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or contains unknown fields.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| ScepError::config(format!("Invalid TOML: {e}")))
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScepError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Validate the configuration.
    ///
    /// All problems are reported together.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.server.url.is_empty() {
            errors.push("server.url is required".to_string());
        } else if Url::parse(&self.server.url).is_err() {
            errors.push(format!("server.url '{}' is not a valid URL", self.server.url));
        }

        if self.certificate.subject.trim().is_empty() {
            errors.push("certificate.subject is required".to_string());
        }

        if self.polling.interval_secs == 0 {
            errors.push("polling.interval_secs must be greater than zero".to_string());
        }

        match (self.trust.mode, &self.trust.fingerprint) {
            (TrustMode::Fingerprint, None) => {
                errors.push("trust.fingerprint is required when trust.mode is 'fingerprint'".to_string());
            }
            (TrustMode::Fingerprint, Some(fp)) if parse_fingerprint(fp).is_err() => {
                errors.push(format!("trust.fingerprint '{}' is not a SHA-256 fingerprint", fp));
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScepError::config(errors.join("; ")))
        }
    }

    /// Transport configuration for this run.
    pub fn client_config(&self) -> Result<ScepClientConfig> {
        let mut builder = ScepClientConfig::builder().server_url(&self.server.url)?;
        if let Some(id) = &self.server.ca_identifier {
            builder = builder.ca_identifier(id);
        }
        if let Some(secs) = self.server.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder.build().map_err(ScepError::config)
    }

    /// CA trust decision for this run.
    pub fn ca_trust(&self) -> Result<CaTrust> {
        match self.trust.mode {
            TrustMode::Insecure => Ok(CaTrust::InsecureAcceptAny),
            TrustMode::Fingerprint => {
                let fp = self.trust.fingerprint.as_deref().ok_or_else(|| {
                    ScepError::config("trust.fingerprint is required when trust.mode is 'fingerprint'")
                })?;
                Ok(CaTrust::Fingerprint(parse_fingerprint(fp)?))
            }
        }
    }

    /// Delay between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }
}
