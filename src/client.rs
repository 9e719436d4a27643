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

//! SCEP transport.
//!
//! [`ScepTransport`] is the capability the enrollment orchestrator drives.
//! [`ScepClient`] implements it over HTTP: GetCACaps and GetCACert are plain
//! GETs, PKIOperation is a POST of the DER pkiMessage when the CA allows it
//! and a GET with a base64 `message` parameter otherwise.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::prelude::*;
use der::{Decode, Encode};
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Mutex;
use x509_cert::Certificate;
use x509_cert::crl::CertificateList;
use x509_cert::name::Name;
use x509_cert::request::CertReq;
use x509_cert::serial_number::SerialNumber;

use crate::config::ScepClientConfig;
use crate::error::{Result, ScepError};
use crate::keygen::KeyPair;
use crate::message::{CertRep, IssuerAndSubject, PkiMessage, decode_cert_rep, envelope};
use crate::types::{
    CaCapabilities, CaCertificates, EnrollmentOutcome, MessageType, TransactionId, content_types,
    operations, parse_certs_only,
};

/// Certificate and key that sign an outgoing pkiMessage.
#[derive(Debug, Clone, Copy)]
pub struct RequestSigner<'a> {
    /// Certificate identifying the requester.
    pub certificate: &'a Certificate,
    /// Key matching `certificate`.
    pub key_pair: &'a KeyPair,
}

/// The SCEP operations used by an enrollment.
#[async_trait]
pub trait ScepTransport: Send + Sync {
    /// Fetch the CA (and RA) certificates.
    async fn get_ca_certs(&self, ca_identifier: Option<&str>) -> Result<CaCertificates>;

    /// Submit a PKCSReq for `csr`.
    ///
    /// `ca_certs` is the trusted CA set: the request is encrypted to its
    /// recipient and the CertRep must be signed by one of its members.
    async fn enroll(
        &self,
        signer: RequestSigner<'_>,
        csr: &CertReq,
        ca_certs: &CaCertificates,
        ca_identifier: Option<&str>,
    ) -> Result<EnrollmentOutcome>;

    /// Poll a pending transaction with GetCertInitial.
    async fn poll(
        &self,
        signer: RequestSigner<'_>,
        subject: &Name,
        transaction_id: &TransactionId,
        ca_certs: &CaCertificates,
        ca_identifier: Option<&str>,
    ) -> Result<EnrollmentOutcome>;

    /// Fetch the CRL covering the certificate `issuer` / `serial`.
    async fn get_crl(
        &self,
        signer: RequestSigner<'_>,
        issuer: &Name,
        serial: &SerialNumber,
        ca_certs: &CaCertificates,
        ca_identifier: Option<&str>,
    ) -> Result<CertificateList>;
}

/// HTTP SCEP client.
///
/// CA capabilities are fetched once per CA identifier and cached for the
/// lifetime of the client. CA certificates are not cached; callers pass the
/// set they decided to trust into each pkiMessage operation.
///
/// # Example
///
/// ```no_run
/// use usg_scep_client::{ScepClient, ScepClientConfig, ScepTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ScepClientConfig::builder()
///     .server_url("http://ca.example.com/scep/pkiclient.exe")?
///     .build()?;
///
/// let client = ScepClient::new(config)?;
/// let ca_certs = client.get_ca_certs(Some("ManagementCA")).await?;
/// println!("Got {} CA certificates", ca_certs.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ScepClient {
    config: ScepClientConfig,
    http: reqwest::Client,
    capabilities: Mutex<HashMap<String, CaCapabilities>>,
}

impl ScepClient {
    /// Create a new SCEP client with the given configuration.
    pub fn new(config: ScepClientConfig) -> Result<Self> {
        let http = build_http_client(&config)?;

        Ok(Self {
            config,
            http,
            capabilities: Mutex::new(HashMap::new()),
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ScepClientConfig {
        &self.config
    }

    /// Query the CA capabilities, using the cached answer when available.
    ///
    /// A CA that does not implement GetCACaps is treated as advertising
    /// nothing.
    pub async fn get_ca_caps(&self, ca_identifier: Option<&str>) -> Result<CaCapabilities> {
        let ca_identifier = self.identifier(ca_identifier);
        let key = cache_key(ca_identifier);
        if let Some(caps) = self.capabilities.lock().await.get(&key) {
            return Ok(caps.clone());
        }

        let url = self.config.build_url(operations::GET_CA_CAPS, ca_identifier);
        tracing::debug!("GET {}", url);
        let response = self.http.get(url).send().await?;

        let caps = if response.status().is_success() {
            CaCapabilities::parse(&response.text().await?)
        } else {
            tracing::debug!("GetCACaps returned {}, assuming no capabilities", response.status());
            CaCapabilities::default()
        };
        tracing::debug!("CA capabilities: {:?}", caps);

        self.capabilities.lock().await.insert(key, caps.clone());
        Ok(caps)
    }

    /// Explicit CA identifier, else the configured one.
    fn identifier<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit.or(self.config.ca_identifier.as_deref())
    }

    /// Sign, encrypt and send one pkiMessage, then verify the CertRep.
    async fn transact(
        &self,
        signer: RequestSigner<'_>,
        message_type: MessageType,
        transaction_id: TransactionId,
        message_data: &[u8],
        ca_certs: &CaCertificates,
        ca_identifier: Option<&str>,
    ) -> Result<CertRep> {
        let caps = self.get_ca_caps(ca_identifier).await?;
        let recipient = ca_certs
            .recipient()
            .ok_or_else(|| ScepError::message("No CA certificate to encrypt the request to"))?;

        let pki_envelope = envelope(message_data, recipient, caps.content_encryption())?;
        let request = PkiMessage::request(message_type, transaction_id, pki_envelope);
        let der = request.sign(
            signer.certificate,
            signer.key_pair,
            caps.digest_algorithm(),
            &[],
        )?;

        tracing::debug!(
            "Sending messageType {} for transaction {}",
            message_type.as_str(),
            request.transaction_id
        );
        let response = self.pki_operation(&caps, &der).await?;
        decode_cert_rep(&response, &request, &ca_certs.certificates, signer.key_pair)
    }

    async fn pki_operation(&self, caps: &CaCapabilities, message: &[u8]) -> Result<Vec<u8>> {
        let request = if caps.post_supported() {
            let url = self.config.build_url(operations::PKI_OPERATION, None);
            tracing::debug!("POST {}", url);
            self.http
                .post(url)
                .header(CONTENT_TYPE, content_types::PKI_MESSAGE)
                .body(message.to_vec())
        } else {
            let encoded = BASE64_STANDARD.encode(message);
            let url = self.config.build_url(operations::PKI_OPERATION, Some(&encoded));
            tracing::debug!("GET {}?operation={}", self.config.server_url, operations::PKI_OPERATION);
            self.http.get(url)
        };

        let response = request.send().await?;
        let response = self.handle_error_response(response).await?;
        check_content_type(&response, &[content_types::PKI_MESSAGE])?;

        Ok(response.bytes().await?.to_vec())
    }

    /// Handle error responses from the server.
    async fn handle_error_response(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .ok()
            .filter(|body| !body.trim().is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string()
            });

        Err(ScepError::server_error(status.as_u16(), message))
    }
}

#[async_trait]
impl ScepTransport for ScepClient {
    async fn get_ca_certs(&self, ca_identifier: Option<&str>) -> Result<CaCertificates> {
        let ca_identifier = self.identifier(ca_identifier);
        let url = self.config.build_url(operations::GET_CA_CERT, ca_identifier);
        tracing::debug!("GET {}", url);

        let response = self.http.get(url).send().await?;
        let response = self.handle_error_response(response).await?;

        let content_type =
            check_content_type(&response, &[content_types::CA_CERT, content_types::CA_RA_CERT])?;
        let body = response.bytes().await?;

        let certs = if content_type == content_types::CA_CERT {
            vec![Certificate::from_der(&body).map_err(|e| {
                ScepError::certificate_parsing(format!("Invalid CA certificate: {}", e))
            })?]
        } else {
            parse_certs_only(&body)?
        };

        Ok(CaCertificates::new(certs))
    }

    async fn enroll(
        &self,
        signer: RequestSigner<'_>,
        csr: &CertReq,
        ca_certs: &CaCertificates,
        ca_identifier: Option<&str>,
    ) -> Result<EnrollmentOutcome> {
        let transaction_id = TransactionId::from_public_key(&signer.key_pair.public_key_der()?);
        let rep = self
            .transact(
                signer,
                MessageType::PkcsReq,
                transaction_id.clone(),
                &csr.to_der()?,
                ca_certs,
                ca_identifier,
            )
            .await?;
        Ok(outcome(rep, transaction_id))
    }

    async fn poll(
        &self,
        signer: RequestSigner<'_>,
        subject: &Name,
        transaction_id: &TransactionId,
        ca_certs: &CaCertificates,
        ca_identifier: Option<&str>,
    ) -> Result<EnrollmentOutcome> {
        let issuer = ca_certs
            .issuer_name()
            .ok_or_else(|| ScepError::message("No CA certificate to name the issuer"))?;
        let message_data = IssuerAndSubject {
            issuer: issuer.clone(),
            subject: subject.clone(),
        }
        .to_der()?;

        let rep = self
            .transact(
                signer,
                MessageType::GetCertInitial,
                transaction_id.clone(),
                &message_data,
                ca_certs,
                ca_identifier,
            )
            .await?;
        Ok(outcome(rep, transaction_id.clone()))
    }

    async fn get_crl(
        &self,
        signer: RequestSigner<'_>,
        issuer: &Name,
        serial: &SerialNumber,
        ca_certs: &CaCertificates,
        ca_identifier: Option<&str>,
    ) -> Result<CertificateList> {
        let message_data = cms::cert::IssuerAndSerialNumber {
            issuer: issuer.clone(),
            serial_number: serial.clone(),
        }
        .to_der()?;
        let transaction_id = TransactionId::from_public_key(&signer.key_pair.public_key_der()?);

        match self
            .transact(
                signer,
                MessageType::GetCrl,
                transaction_id,
                &message_data,
                ca_certs,
                ca_identifier,
            )
            .await?
        {
            CertRep::Success { crls, .. } => crls
                .into_iter()
                .next()
                .ok_or_else(|| ScepError::operation_failure("CertRep contains no CRL")),
            CertRep::Pending => Err(ScepError::operation_failure("GetCRL answered PENDING")),
            CertRep::Failure(fail_info) => Err(ScepError::operation_failure(format!(
                "CA rejected GetCRL: {}",
                fail_info
            ))),
        }
    }
}

fn outcome(rep: CertRep, transaction_id: TransactionId) -> EnrollmentOutcome {
    match rep {
        CertRep::Success { certificates, .. } => EnrollmentOutcome::Success { certificates },
        CertRep::Pending => EnrollmentOutcome::Pending { transaction_id },
        CertRep::Failure(fail_info) => EnrollmentOutcome::Failure { fail_info },
    }
}

fn cache_key(ca_identifier: Option<&str>) -> String {
    ca_identifier.unwrap_or_default().to_string()
}

/// Return the media type of `response` if it is one of `expected`.
fn check_content_type(response: &reqwest::Response, expected: &[&'static str]) -> Result<&'static str> {
    let actual = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let media_type = actual.split(';').next().unwrap_or("").trim();

    expected
        .iter()
        .find(|e| e.eq_ignore_ascii_case(media_type))
        .copied()
        .ok_or_else(|| ScepError::invalid_content_type(expected.join(" or "), actual))
}

/// Build the reqwest client for `config`.
fn build_http_client(config: &ScepClientConfig) -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in &config.additional_headers {
        let name = reqwest::header::HeaderName::try_from(name.as_str())
            .map_err(|e| ScepError::config(format!("Invalid header name '{}': {}", name, e)))?;
        let value = reqwest::header::HeaderValue::try_from(value.as_str())
            .map_err(|e| ScepError::config(format!("Invalid header value: {}", e)))?;
        headers.insert(name, value);
    }

    Ok(reqwest::Client::builder()
        .timeout(config.timeout)
        .use_rustls_tls()
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .user_agent(crate::USER_AGENT)
        .default_headers(headers)
        .build()?)
}
