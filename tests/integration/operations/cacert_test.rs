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

//! Integration tests for GetCACaps and GetCACert

use crate::integration::{MODERN_CAPS, MockScepServer, SCEP_PATH};
use usg_scep_client::csr::DistinguishedName;
use usg_scep_client::keygen::CryptoContext;
use usg_scep_client::types::{ContentEncryption, DigestAlgorithm};
use usg_scep_client::{ScepError, ScepTransport};
use wiremock::matchers::{path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_single_ca_certificate() {
    let mock = MockScepServer::start().await;
    mock.mock_ca_cert().await;

    let client = mock.client();
    let ca_certs = client.get_ca_certs(None).await.expect("GetCACert failed");

    assert_eq!(ca_certs.len(), 1);
    assert_eq!(ca_certs.recipient(), Some(&mock.ca.certificate));
    assert!(mock.ca.trust().check(&ca_certs).is_ok());
}

#[tokio::test]
async fn test_ra_certificate_is_recipient() {
    let mock = MockScepServer::start().await;

    let ra_key = CryptoContext::new().generate(1024).unwrap();
    let ra_subject: DistinguishedName = "CN=Mock SCEP RA,O=Example".parse().unwrap();
    let ra_cert = mock
        .ca
        .issue(ra_subject.as_name().clone(), ra_key.subject_public_key_info().unwrap());
    mock.mock_ca_ra_certs(&[mock.ca.certificate.clone(), ra_cert.clone()])
        .await;

    let client = mock.client();
    let ca_certs = client.get_ca_certs(None).await.expect("GetCACert failed");

    assert_eq!(ca_certs.len(), 2);
    assert_eq!(ca_certs.recipient(), Some(&ra_cert));
    assert_eq!(
        ca_certs.issuer_name(),
        Some(&mock.ca.certificate.tbs_certificate.subject)
    );

    let trusted = mock.ca.trust().check(&ca_certs).unwrap();
    assert_eq!(trusted.certificates, ca_certs.certificates);
}

#[tokio::test]
async fn test_ca_identifier_sent_as_message() {
    let mock = MockScepServer::start().await;
    Mock::given(path(SCEP_PATH))
        .and(query_param("operation", "GetCACert"))
        .and(query_param("message", "ManagementCA"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(der::Encode::to_der(&mock.ca.certificate).unwrap())
                .insert_header("Content-Type", "application/x-x509-ca-cert"),
        )
        .expect(1)
        .mount(mock.inner())
        .await;

    let client = mock.client();
    let ca_certs = client.get_ca_certs(Some("ManagementCA")).await.unwrap();
    assert_eq!(ca_certs.len(), 1);
}

#[tokio::test]
async fn test_invalid_content_type_handling() {
    let mock = MockScepServer::start().await;
    Mock::given(path(SCEP_PATH))
        .and(query_param("operation", "GetCACert"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("not a certificate")
                .insert_header("Content-Type", "text/html"),
        )
        .mount(mock.inner())
        .await;

    let result = mock.client().get_ca_certs(None).await;
    assert!(
        matches!(result, Err(ScepError::InvalidContentType { .. })),
        "{result:?}"
    );
}

#[tokio::test]
async fn test_malformed_certificate_body() {
    let mock = MockScepServer::start().await;
    Mock::given(path(SCEP_PATH))
        .and(query_param("operation", "GetCACert"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0x30, 0x03, 0x02, 0x01])
                .insert_header("Content-Type", "application/x-x509-ca-cert"),
        )
        .mount(mock.inner())
        .await;

    let result = mock.client().get_ca_certs(None).await;
    assert!(matches!(result, Err(ScepError::CertificateParsing(_))), "{result:?}");
}

#[tokio::test]
async fn test_capabilities_parsed_and_cached() {
    let mock = MockScepServer::start().await;
    Mock::given(path(SCEP_PATH))
        .and(query_param("operation", "GetCACaps"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MODERN_CAPS))
        .expect(1)
        .mount(mock.inner())
        .await;

    let client = mock.client();
    for _ in 0..3 {
        let caps = client.get_ca_caps(None).await.unwrap();
        assert!(caps.post_supported());
        assert_eq!(caps.digest_algorithm(), DigestAlgorithm::Sha256);
        assert_eq!(caps.content_encryption(), ContentEncryption::Aes128Cbc);
    }
}

#[tokio::test]
async fn test_missing_capabilities_is_empty() {
    let mock = MockScepServer::start().await;
    mock.mock_server_error("GetCACaps", 404, "Not Found").await;

    let caps = mock.client().get_ca_caps(None).await.unwrap();
    assert!(!caps.post_supported());
}
