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

//! SCEP Enrollment Command-Line Tool
//!
//! Enrolls for a certificate against a SCEP CA and writes the request, CA
//! certificates, issued certificate, private key and CRL as PEM.
//!
//! # Usage
//!
//! ```text
//! scep-enroll [OPTIONS] --url <URL> --dn <DN> <--ca-fingerprint <SHA256>|--trust-any-ca>
//!
//! Options:
//!   -c, --config <PATH>              Path to configuration file
//!   -u, --url <URL>                  SCEP server URL
//!   -i, --ca-identifier <NAME>       CA identifier
//!   -d, --dn <DN>                    Subject distinguished name
//!   -p, --challenge <PASSWORD>       Challenge password
//!   -k, --key-size <BITS>            RSA key size
//!       --ca-fingerprint <SHA256>    Pinned CA certificate fingerprint
//!       --trust-any-ca               Accept any CA certificate (insecure)
//!   -t, --text                       Print every artifact as PEM
//!   -v, --verbose                    Enable verbose output
//!   -q, --quiet                      Suppress non-error output
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Enroll and keep the certificate and key
//! scep-enroll --url http://ca.example.com/scep/pkiclient.exe \
//!     --dn "CN=device01,O=Example" --challenge secret \
//!     --ca-fingerprint AB:CD:... \
//!     --certificate-file cert.pem --key-file key.pem
//!
//! # Run from a configuration file
//! scep-enroll --config /etc/scep/enroll.toml
//! ```

use clap::Parser;
use std::error::Error as _;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use usg_scep_client::config::TrustMode;
use usg_scep_client::{
    CryptoContext, Enrollment, EnrollmentConfig, EnrollmentRequest, EnrollmentResult, ScepClient,
    ScepError,
};

/// SCEP Enrollment Command-Line Tool
#[derive(Parser)]
#[command(name = "scep-enroll")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Certificate enrollment using SCEP (RFC 8894)", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// SCEP server URL
    #[arg(short, long, value_name = "URL")]
    url: Option<String>,

    /// CA identifier on multi-CA servers
    #[arg(short = 'i', long, value_name = "NAME")]
    ca_identifier: Option<String>,

    /// Subject distinguished name, e.g. "CN=host,O=org"
    #[arg(short, long, value_name = "DN")]
    dn: Option<String>,

    /// Challenge password
    #[arg(short = 'p', long, value_name = "PASSWORD")]
    challenge: Option<String>,

    /// RSA key size in bits
    #[arg(short, long, value_name = "BITS")]
    key_size: Option<usize>,

    /// Expected SHA-256 fingerprint of the CA certificate
    #[arg(long, value_name = "SHA256", conflicts_with = "trust_any_ca")]
    ca_fingerprint: Option<String>,

    /// Accept any CA certificate without verification (insecure)
    #[arg(long)]
    trust_any_ca: bool,

    /// Seconds between polls while the request is pending
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Give up after this many polls
    #[arg(long, value_name = "N")]
    max_poll_attempts: Option<u32>,

    /// HTTP timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Append the CSR to this file
    #[arg(long, value_name = "PATH")]
    csr_file: Option<PathBuf>,

    /// Append the CA certificates to this file
    #[arg(long, value_name = "PATH")]
    ca_certificate_file: Option<PathBuf>,

    /// Append the issued certificate to this file
    #[arg(long, value_name = "PATH")]
    certificate_file: Option<PathBuf>,

    /// Append the private key to this file
    #[arg(long, value_name = "PATH")]
    key_file: Option<PathBuf>,

    /// Append the CRL to this file
    #[arg(long, value_name = "PATH")]
    crl_file: Option<PathBuf>,

    /// Print every artifact as PEM text
    #[arg(short, long)]
    text: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    /// Layer the command-line options over the configuration file.
    fn into_config(self) -> Result<EnrollmentConfig, ScepError> {
        let mut config = match &self.config {
            Some(path) => EnrollmentConfig::from_toml_file(path)?,
            None => EnrollmentConfig::default(),
        };

        if let Some(url) = self.url {
            config.server.url = url;
        }
        if let Some(id) = self.ca_identifier {
            config.server.ca_identifier = Some(id);
        }
        if let Some(secs) = self.timeout {
            config.server.timeout_secs = Some(secs);
        }
        if let Some(dn) = self.dn {
            config.certificate.subject = dn;
        }
        if let Some(challenge) = self.challenge {
            config.certificate.challenge = Some(challenge);
        }
        if let Some(bits) = self.key_size {
            config.certificate.key_size = bits;
        }
        if let Some(fp) = self.ca_fingerprint {
            config.trust.mode = TrustMode::Fingerprint;
            config.trust.fingerprint = Some(fp);
        } else if self.trust_any_ca {
            config.trust.mode = TrustMode::Insecure;
        }
        if let Some(secs) = self.poll_interval {
            config.polling.interval_secs = secs;
        }
        if let Some(max) = self.max_poll_attempts {
            config.polling.max_attempts = Some(max);
        }

        let output = &mut config.output;
        output.csr_file = self.csr_file.or(output.csr_file.take());
        output.ca_certificate_file = self.ca_certificate_file.or(output.ca_certificate_file.take());
        output.certificate_file = self.certificate_file.or(output.certificate_file.take());
        output.key_file = self.key_file.or(output.key_file.take());
        output.crl_file = self.crl_file.or(output.crl_file.take());
        output.text |= self.text;

        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Create runtime for async operations
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(EnrollmentResult::Issued(issued)) => {
            tracing::info!(
                "Enrollment complete (transaction {})",
                issued.transaction_id
            );
            ExitCode::SUCCESS
        }
        Ok(EnrollmentResult::Rejected { fail_info, .. }) => {
            eprintln!("Error: enrollment rejected by CA: {}", fail_info);
            ExitCode::FAILURE
        }
        Err(e) => {
            report(&e, verbose);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<EnrollmentResult, ScepError> {
    let config = cli.into_config()?;
    let client = ScepClient::new(config.client_config()?)?;
    let request = EnrollmentRequest::from_config(&config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling enrollment");
            on_signal.cancel();
        }
    });

    let mut enrollment = Enrollment::new(&client, CryptoContext::new(), config.ca_trust()?, request)
        .output(config.output.clone())
        .poll_interval(config.poll_interval())
        .max_poll_attempts(config.polling.max_attempts)
        .cancellation_token(cancel);

    enrollment.run().await
}

fn report(error: &ScepError, verbose: bool) {
    eprintln!("Error: {}", error);
    if let Some(hint) = error.hint() {
        eprintln!("Hint: {}", hint);
    }

    if verbose {
        let mut source = error.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        eprintln!("{:#?}", error);
    }
}
