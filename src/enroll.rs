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

//! Enrollment orchestrator.
//!
//! [`Enrollment`] drives one SCEP transaction through
//!
//! ```text
//! START -> CA_FETCHED -> SUBMITTED -> PENDING(n) -> ISSUED | REJECTED
//! ```
//!
//! It owns the key pair for the run, builds the bootstrap certificate and
//! CSR, asks the injected [`CaTrust`] about the CA certificates, polls while
//! the CA reports PENDING and writes every artifact through the PEM codec.
//! Failures of the CA fetch, submission or polling abort the run; output
//! and CRL failures are logged and the run continues.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use spki::SubjectPublicKeyInfoOwned;
use tokio_util::sync::CancellationToken;
use x509_cert::Certificate;
use x509_cert::crl::CertificateList;
use x509_cert::name::Name;

use crate::client::{RequestSigner, ScepTransport};
use crate::config::{DEFAULT_POLL_INTERVAL, EnrollmentConfig, OutputConfig};
use crate::csr::{DistinguishedName, build_csr, build_self_signed};
use crate::error::{Result, ScepError};
use crate::keygen::{CryptoContext, DEFAULT_KEY_SIZE, KeyPair};
use crate::pem::{self, PemArtifact};
use crate::trust::CaTrust;
use crate::types::{CaCertificates, EnrollmentOutcome, FailInfo, TransactionId};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    /// Nothing sent yet.
    Start,
    /// CA certificates fetched and trusted.
    CaFetched,
    /// PKCSReq sent.
    Submitted,
    /// Waiting for approval; carries the number of polls sent.
    Pending(u32),
    /// Certificate issued.
    Issued,
    /// Request rejected.
    Rejected,
}

impl fmt::Display for EnrollmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("START"),
            Self::CaFetched => f.write_str("CA_FETCHED"),
            Self::Submitted => f.write_str("SUBMITTED"),
            Self::Pending(n) => write!(f, "PENDING({})", n),
            Self::Issued => f.write_str("ISSUED"),
            Self::Rejected => f.write_str("REJECTED"),
        }
    }
}

/// What to enroll for.
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    /// Subject of the bootstrap certificate and the CSR.
    pub subject: DistinguishedName,
    /// Challenge password, if the CA requires one.
    pub challenge: Option<String>,
    /// RSA key size in bits.
    pub key_size: usize,
    /// CA identifier on multi-CA servers.
    pub ca_identifier: Option<String>,
}

impl EnrollmentRequest {
    /// Request for `subject` with a default-sized key and no challenge.
    pub fn new(subject: DistinguishedName) -> Self {
        Self {
            subject,
            challenge: None,
            key_size: DEFAULT_KEY_SIZE,
            ca_identifier: None,
        }
    }

    /// Request described by the `[certificate]` and `[server]` sections.
    pub fn from_config(config: &EnrollmentConfig) -> Result<Self> {
        Ok(Self {
            subject: config.certificate.subject.parse()?,
            challenge: config.certificate.challenge.clone(),
            key_size: config.certificate.key_size,
            ca_identifier: config.server.ca_identifier.clone().filter(|id| !id.is_empty()),
        })
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone)]
pub enum EnrollmentResult {
    /// The CA issued a certificate.
    Issued(IssuedCertificate),
    /// The CA rejected the request.
    Rejected {
        /// Reason supplied by the CA.
        fail_info: FailInfo,
        /// Rejected transaction.
        transaction_id: TransactionId,
    },
}

/// An issued certificate and what came with it.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// The certificate for our key.
    pub certificate: Certificate,
    /// Other certificates returned alongside it.
    pub chain: Vec<Certificate>,
    /// CRL, when one was requested and retrieved.
    pub crl: Option<CertificateList>,
    /// Number of GetCertInitial polls sent.
    pub polls: u32,
    /// Transaction that produced the certificate.
    pub transaction_id: TransactionId,
}

/// One enrollment run against a [`ScepTransport`].
pub struct Enrollment<'a, T: ScepTransport + ?Sized> {
    transport: &'a T,
    ctx: CryptoContext,
    trust: CaTrust,
    request: EnrollmentRequest,
    output: OutputConfig,
    poll_interval: Duration,
    max_poll_attempts: Option<u32>,
    cancel: CancellationToken,
    text_sink: Box<dyn Write + Send>,
    state: EnrollmentState,
}

impl<'a, T: ScepTransport + ?Sized> Enrollment<'a, T> {
    /// Create a run with no file output, a 1 second poll interval and no
    /// poll limit.
    pub fn new(
        transport: &'a T,
        ctx: CryptoContext,
        trust: CaTrust,
        request: EnrollmentRequest,
    ) -> Self {
        Self {
            transport,
            ctx,
            trust,
            request,
            output: OutputConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: None,
            cancel: CancellationToken::new(),
            text_sink: Box::new(std::io::stdout()),
            state: EnrollmentState::Start,
        }
    }

    /// Set the artifact outputs.
    pub fn output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    /// Set the delay between polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Stop polling after `max` attempts.
    pub fn max_poll_attempts(mut self, max: Option<u32>) -> Self {
        self.max_poll_attempts = max;
        self
    }

    /// Abort the poll wait when `token` is cancelled.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Where text mode prints artifacts (stdout by default).
    pub fn text_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.text_sink = sink;
        self
    }

    /// Current state.
    pub fn state(&self) -> EnrollmentState {
        self.state
    }

    fn transition(&mut self, state: EnrollmentState) {
        tracing::debug!("Enrollment state {} -> {}", self.state, state);
        self.state = state;
    }

    /// Run the transaction to a terminal state.
    pub async fn run(&mut self) -> Result<EnrollmentResult> {
        let key_pair = self.ctx.generate(self.request.key_size)?;
        let subject = self.request.subject.clone();
        let bootstrap = build_self_signed(&self.ctx, &key_pair, &subject)?;
        let csr = build_csr(&key_pair, &subject, self.request.challenge.as_deref())?;
        let ca_identifier = self.request.ca_identifier.clone();
        let ca_identifier = ca_identifier.as_deref();

        let csr_file = self.output.csr_file.clone();
        self.emit("Certificate Request", csr_file.as_deref(), PemArtifact::Request(csr.clone()));

        // START -> CA_FETCHED
        let fetched = self.transport.get_ca_certs(ca_identifier).await?;
        if fetched.is_empty() {
            tracing::warn!("CA returned no certificates");
        } else {
            tracing::info!("Received {} CA certificate(s)", fetched.len());
        }
        let ca_certs = self.trust.check(&fetched)?;

        let ca_file = self.output.ca_certificate_file.clone();
        for (i, cert) in ca_certs.iter().enumerate() {
            self.emit(
                &format!("CA Certificate {}", i + 1),
                ca_file.as_deref(),
                PemArtifact::Certificate(cert.clone()),
            );
        }
        self.transition(EnrollmentState::CaFetched);

        // CA_FETCHED -> SUBMITTED
        let signer = RequestSigner {
            certificate: &bootstrap,
            key_pair: &key_pair,
        };
        tracing::info!("Submitting enrollment request for {}", subject);
        let mut outcome = self
            .transport
            .enroll(signer, &csr, &ca_certs, ca_identifier)
            .await?;
        self.transition(EnrollmentState::Submitted);

        // SUBMITTED/PENDING -> PENDING
        let mut polls = 0u32;
        let mut transaction_id = TransactionId::from_public_key(&key_pair.public_key_der()?);
        let certificates = loop {
            match outcome {
                EnrollmentOutcome::Pending {
                    transaction_id: pending,
                } => {
                    transaction_id = pending;
                    if let Some(max) = self.max_poll_attempts
                        && polls >= max
                    {
                        return Err(ScepError::PollLimitReached { attempts: polls });
                    }

                    tracing::info!(
                        "Enrollment pending (transaction {}), polling in {:?}",
                        transaction_id,
                        self.poll_interval
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(ScepError::Cancelled),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }

                    polls += 1;
                    self.transition(EnrollmentState::Pending(polls));
                    outcome = self
                        .transport
                        .poll(
                            signer,
                            subject.as_name(),
                            &transaction_id,
                            &ca_certs,
                            ca_identifier,
                        )
                        .await?;
                }
                EnrollmentOutcome::Success { certificates } => break certificates,
                EnrollmentOutcome::Failure { fail_info } => {
                    self.transition(EnrollmentState::Rejected);
                    tracing::error!("Enrollment rejected by CA: {}", fail_info);
                    return Ok(EnrollmentResult::Rejected {
                        fail_info,
                        transaction_id,
                    });
                }
            }
        };

        // -> ISSUED
        let spki = key_pair.subject_public_key_info()?;
        let leaf_index = select_leaf(&certificates, &spki, subject.as_name())
            .ok_or_else(|| ScepError::message("CA reported success but returned no certificate"))?;
        self.transition(EnrollmentState::Issued);
        tracing::info!("Certificate issued after {} poll(s)", polls);

        let cert_file = self.output.certificate_file.clone();
        for (i, cert) in certificates.iter().enumerate() {
            let path = (i == leaf_index).then_some(cert_file.as_deref()).flatten();
            self.emit(
                &format!("Certificate {}", i + 1),
                path,
                PemArtifact::Certificate(cert.clone()),
            );
        }

        let key_file = self.output.key_file.clone();
        self.emit("RSA Private Key", key_file.as_deref(), PemArtifact::PrivateKey(key_pair.clone()));

        let mut chain = certificates;
        let certificate = chain.remove(leaf_index);

        let crl = if self.output.text || self.output.crl_file.is_some() {
            self.fetch_crl(&certificate, &key_pair, &ca_certs, ca_identifier).await
        } else {
            tracing::debug!("No CRL output requested, skipping GetCRL");
            None
        };

        Ok(EnrollmentResult::Issued(IssuedCertificate {
            certificate,
            chain,
            crl,
            polls,
            transaction_id,
        }))
    }

    async fn fetch_crl(
        &mut self,
        certificate: &Certificate,
        key_pair: &KeyPair,
        ca_certs: &CaCertificates,
        ca_identifier: Option<&str>,
    ) -> Option<CertificateList> {
        let signer = RequestSigner {
            certificate,
            key_pair,
        };
        let tbs = &certificate.tbs_certificate;

        match self
            .transport
            .get_crl(signer, &tbs.issuer, &tbs.serial_number, ca_certs, ca_identifier)
            .await
        {
            Ok(crl) => {
                let crl_file = self.output.crl_file.clone();
                self.emit(
                    "Certificate Revocation List",
                    crl_file.as_deref(),
                    PemArtifact::Crl(crl.clone()),
                );
                Some(crl)
            }
            Err(e) => {
                tracing::warn!("CRL retrieval failed: {}", e);
                None
            }
        }
    }

    /// Print and/or append one artifact; failures are logged only.
    fn emit(&mut self, title: &str, path: Option<&Path>, artifact: PemArtifact) {
        if self.output.text
            && let Err(e) = pem::write_to_stream(&mut self.text_sink, title, &artifact)
        {
            tracing::warn!("Failed to print {}: {}", title, e);
        }

        if let Some(path) = path
            && let Err(e) = pem::write_to_file(path, &artifact)
        {
            tracing::warn!("Failed to write {} to {}: {}", title, path.display(), e);
        }
    }
}

/// Pick the certificate issued for our key out of a CertRep.
///
/// Matches on public key first, then on subject, and falls back to the last
/// certificate.
pub fn select_leaf(
    certificates: &[Certificate],
    public_key: &SubjectPublicKeyInfoOwned,
    subject: &Name,
) -> Option<usize> {
    if let Some(i) = certificates
        .iter()
        .position(|c| &c.tbs_certificate.subject_public_key_info == public_key)
    {
        return Some(i);
    }

    if let Some(i) = certificates
        .iter()
        .rposition(|c| &c.tbs_certificate.subject == subject)
    {
        tracing::warn!("No returned certificate carries our public key, matched by subject");
        return Some(i);
    }

    let last = certificates.len().checked_sub(1)?;
    tracing::warn!("Could not identify the issued certificate, using the last one returned");
    Some(last)
}
