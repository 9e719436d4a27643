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

//! Integration test utilities and helpers
//!
//! This module provides the mock SCEP CA used by the integration tests:
//! GetCACaps / GetCACert mocks and a scripted PKIOperation responder.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use base64::prelude::*;
use const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION;
use der::asn1::BitString;
use der::{Any, Decode, Encode};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use usg_scep_client::csr::DistinguishedName;
use usg_scep_client::keygen::{CryptoContext, KeyPair};
use usg_scep_client::message::{IssuerAndSubject, PkiMessage, envelope, open_envelope};
use usg_scep_client::trust::compute_fingerprint;
use usg_scep_client::types::{
    ContentEncryption, DigestAlgorithm, FailInfo, MessageType, PkiStatus, build_certs_only,
    content_types, parse_certs_only,
};
use usg_scep_client::{CaTrust, ScepClient, ScepClientConfig};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use x509_cert::Certificate;
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::crl::{CertificateList, TbsCertList};
use x509_cert::name::Name;
use x509_cert::request::CertReq;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};

/// Endpoint path of the mock SCEP CA.
pub const SCEP_PATH: &str = "/scep/pkiclient.exe";

/// Capabilities of a modern CA.
pub const MODERN_CAPS: &str = "POSTPKIOperation\nSHA-256\nAES\nSCEPStandard\n";

/// How the CA answers a PKCSReq or GetCertInitial.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Issue,
    Pending,
    Fail(FailInfo),
}

/// A pkiMessage the CA received, after decryption.
#[derive(Debug, Clone)]
pub struct Received {
    pub message: PkiMessage,
    pub content: Vec<u8>,
}

/// Test certificate authority.
pub struct MockCa {
    pub key: KeyPair,
    pub certificate: Certificate,
    replies: Mutex<VecDeque<Reply>>,
    crl_reply: Mutex<Option<FailInfo>>,
    received: Mutex<Vec<Received>>,
    requests: Mutex<Vec<CertReq>>,
}

impl MockCa {
    pub fn new() -> Arc<Self> {
        let ctx = CryptoContext::new();
        let key = ctx.generate(2048).expect("CA key");
        let subject: DistinguishedName = "CN=Mock SCEP CA,O=Example".parse().expect("CA name");
        let certificate = sign_certificate(
            &key,
            subject.as_name().clone(),
            subject.as_name().clone(),
            key.subject_public_key_info().expect("CA SPKI"),
        );

        Arc::new(Self {
            key,
            certificate,
            replies: Mutex::new(VecDeque::new()),
            crl_reply: Mutex::new(None),
            received: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Queue answers for the next PKCSReq/GetCertInitial messages; once the
    /// queue is empty every request is issued.
    pub fn script(&self, replies: &[Reply]) {
        self.replies.lock().unwrap().extend(replies.iter().copied());
    }

    /// Reject every GetCRL with `fail_info`.
    pub fn fail_crl(&self, fail_info: FailInfo) {
        *self.crl_reply.lock().unwrap() = Some(fail_info);
    }

    pub fn trust(&self) -> CaTrust {
        CaTrust::Fingerprint(compute_fingerprint(&self.certificate).expect("fingerprint"))
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    pub fn message_types(&self) -> Vec<MessageType> {
        self.received().iter().map(|r| r.message.message_type).collect()
    }

    pub fn last_csr(&self) -> Option<CertReq> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// Certificate for `subject` / `public_key` signed by this CA.
    pub fn issue(&self, subject: Name, public_key: SubjectPublicKeyInfoOwned) -> Certificate {
        sign_certificate(
            &self.key,
            self.certificate.tbs_certificate.subject.clone(),
            subject,
            public_key,
        )
    }

    pub fn crl(&self) -> CertificateList {
        let now = SystemTime::now();
        let tbs_cert_list = TbsCertList {
            version: Version::V2,
            signature: signature_algorithm(),
            issuer: self.certificate.tbs_certificate.subject.clone(),
            this_update: Time::try_from(now).unwrap(),
            next_update: Some(Time::try_from(now + Duration::from_secs(86400)).unwrap()),
            revoked_certificates: None,
            crl_extensions: None,
        };
        let signature = self
            .key
            .sign(DigestAlgorithm::Sha256, &tbs_cert_list.to_der().unwrap())
            .unwrap();

        CertificateList {
            tbs_cert_list,
            signature_algorithm: signature_algorithm(),
            signature: BitString::from_bytes(&signature).unwrap(),
        }
    }

    /// Decrypt one pkiMessage and build the signed CertRep.
    fn handle(&self, der: &[u8]) -> Result<Vec<u8>, String> {
        let embedded = parse_certs_only(der).map_err(|e| e.to_string())?;
        let requester = embedded.first().cloned().ok_or("no signer certificate")?;
        let message = PkiMessage::decode(der, &embedded).map_err(|e| e.to_string())?;
        let content = open_envelope(message.envelope.as_deref().ok_or("no envelope")?, &self.key)
            .map_err(|e| e.to_string())?;

        self.received.lock().unwrap().push(Received {
            message: message.clone(),
            content: content.clone(),
        });

        let reply = match message.message_type {
            MessageType::PkcsReq => {
                let csr = CertReq::from_der(&content).map_err(|e| e.to_string())?;
                self.requests.lock().unwrap().push(csr);
                self.next_reply()
            }
            MessageType::GetCertInitial => {
                IssuerAndSubject::from_der(&content).map_err(|e| e.to_string())?;
                self.next_reply()
            }
            MessageType::GetCrl => match *self.crl_reply.lock().unwrap() {
                Some(fail_info) => Reply::Fail(fail_info),
                None => {
                    let inner = build_certs_only(&[], &[self.crl()]).map_err(|e| e.to_string())?;
                    return self.sign_success(&message, &requester, &inner);
                }
            },
            other => return Err(format!("unexpected messageType {:?}", other)),
        };

        match reply {
            Reply::Issue => {
                let csr = self.last_csr().ok_or("nothing to issue")?;
                let issued = self.issue(csr.info.subject.clone(), csr.info.public_key.clone());
                let inner = build_certs_only(&[issued, self.certificate.clone()], &[])
                    .map_err(|e| e.to_string())?;
                self.sign_success(&message, &requester, &inner)
            }
            Reply::Pending => self.sign(PkiMessage::cert_rep(&message, PkiStatus::Pending)),
            Reply::Fail(fail_info) => self.sign(
                PkiMessage::cert_rep(&message, PkiStatus::Failure).with_fail_info(fail_info),
            ),
        }
    }

    fn next_reply(&self) -> Reply {
        self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Issue)
    }

    fn sign_success(
        &self,
        request: &PkiMessage,
        requester: &Certificate,
        inner: &[u8],
    ) -> Result<Vec<u8>, String> {
        let sealed = envelope(inner, requester, ContentEncryption::Aes128Cbc)
            .map_err(|e| e.to_string())?;
        self.sign(PkiMessage::cert_rep(request, PkiStatus::Success).with_envelope(sealed))
    }

    fn sign(&self, response: PkiMessage) -> Result<Vec<u8>, String> {
        response
            .sign(&self.certificate, &self.key, DigestAlgorithm::Sha256, &[])
            .map_err(|e| e.to_string())
    }
}

/// wiremock responder for PKIOperation, POST body or GET `message`.
struct PkiOperation {
    ca: Arc<MockCa>,
}

impl Respond for PkiOperation {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let der = if request.body.is_empty() {
            request
                .url
                .query_pairs()
                .find(|(k, _)| k == "message")
                .and_then(|(_, v)| BASE64_STANDARD.decode(v.as_bytes()).ok())
                .unwrap_or_default()
        } else {
            request.body.clone()
        };

        match self.ca.handle(&der) {
            Ok(body) => ResponseTemplate::new(200)
                .set_body_bytes(body)
                .insert_header("Content-Type", content_types::PKI_MESSAGE),
            Err(e) => ResponseTemplate::new(500).set_body_string(e),
        }
    }
}

/// Mock SCEP server builder for integration tests
pub struct MockScepServer {
    server: MockServer,
    pub ca: Arc<MockCa>,
}

impl MockScepServer {
    /// Start a server with no mocks mounted.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            ca: MockCa::new(),
        }
    }

    /// Start a server that answers GetCACaps, GetCACert and PKIOperation
    /// the way a modern CA does.
    pub async fn modern() -> Self {
        let mock = Self::start().await;
        mock.mock_caps(MODERN_CAPS).await;
        mock.mock_ca_cert().await;
        mock.mock_pki_operation("POST").await;
        mock
    }

    /// SCEP endpoint URL.
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), SCEP_PATH)
    }

    /// Get a reference to the inner MockServer for custom mocking
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Client for this server.
    pub fn client(&self) -> ScepClient {
        let config = ScepClientConfig::builder()
            .server_url(self.url())
            .expect("Valid URL")
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Valid config");
        ScepClient::new(config).expect("Client creation failed")
    }

    pub async fn mock_caps(&self, caps: &str) {
        Mock::given(method("GET"))
            .and(path(SCEP_PATH))
            .and(query_param("operation", "GetCACaps"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(caps)
                    .insert_header("Content-Type", content_types::TEXT_PLAIN),
            )
            .mount(&self.server)
            .await;
    }

    /// GetCACert answered with the CA certificate as a single DER body.
    pub async fn mock_ca_cert(&self) {
        Mock::given(method("GET"))
            .and(path(SCEP_PATH))
            .and(query_param("operation", "GetCACert"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(self.ca.certificate.to_der().unwrap())
                    .insert_header("Content-Type", content_types::CA_CERT),
            )
            .mount(&self.server)
            .await;
    }

    /// GetCACert answered with a degenerate PKCS#7 of `certs`.
    pub async fn mock_ca_ra_certs(&self, certs: &[Certificate]) {
        Mock::given(method("GET"))
            .and(path(SCEP_PATH))
            .and(query_param("operation", "GetCACert"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(build_certs_only(certs, &[]).unwrap())
                    .insert_header("Content-Type", content_types::CA_RA_CERT),
            )
            .mount(&self.server)
            .await;
    }

    /// PKIOperation over `http_method` ("GET" or "POST") answered by the CA.
    pub async fn mock_pki_operation(&self, http_method: &str) {
        Mock::given(method(http_method))
            .and(path(SCEP_PATH))
            .and(query_param("operation", "PKIOperation"))
            .respond_with(PkiOperation {
                ca: Arc::clone(&self.ca),
            })
            .mount(&self.server)
            .await;
    }

    /// Answer `operation` with an HTTP error.
    pub async fn mock_server_error(&self, operation: &str, status: u16, message: &str) {
        Mock::given(path(SCEP_PATH))
            .and(query_param("operation", operation))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_string(message)
                    .insert_header("Content-Type", "text/plain"),
            )
            .mount(&self.server)
            .await;
    }
}

fn signature_algorithm() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: SHA_256_WITH_RSA_ENCRYPTION,
        parameters: Some(Any::null()),
    }
}

/// Certificate for `subject` / `public_key` under `issuer`, signed with `signer`.
pub fn sign_certificate(
    signer: &KeyPair,
    issuer: Name,
    subject: Name,
    public_key: SubjectPublicKeyInfoOwned,
) -> Certificate {
    static SERIAL: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(1);
    let serial = SERIAL.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let now = SystemTime::now();
    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[0x01, (serial >> 8) as u8, serial as u8]).unwrap(),
        signature: signature_algorithm(),
        issuer,
        validity: Validity {
            not_before: Time::try_from(now - Duration::from_secs(60)).unwrap(),
            not_after: Time::try_from(now + Duration::from_secs(365 * 86400)).unwrap(),
        },
        subject,
        subject_public_key_info: public_key,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };
    let signature = signer
        .sign(DigestAlgorithm::Sha256, &tbs_certificate.to_der().unwrap())
        .unwrap();

    Certificate {
        tbs_certificate,
        signature_algorithm: signature_algorithm(),
        signature: BitString::from_bytes(&signature).unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let mock_server = MockScepServer::start().await;
        assert!(mock_server.url().starts_with("http://"));
        assert!(mock_server.url().ends_with(SCEP_PATH));
    }

    #[test]
    fn test_ca_issues_for_subject() {
        let ca = MockCa::new();
        let kp = CryptoContext::new().generate(1024).unwrap();
        let subject: DistinguishedName = "CN=device".parse().unwrap();
        let cert = ca.issue(subject.as_name().clone(), kp.subject_public_key_info().unwrap());

        assert_eq!(&cert.tbs_certificate.subject, subject.as_name());
        assert_eq!(cert.tbs_certificate.issuer, ca.certificate.tbs_certificate.subject);
    }
}
