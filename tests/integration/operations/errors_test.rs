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

//! Integration tests for HTTP and protocol error handling

use crate::integration::{MODERN_CAPS, MockScepServer, SCEP_PATH};
use usg_scep_client::keygen::CryptoContext;
use usg_scep_client::{CaTrust, Enrollment, EnrollmentRequest, ScepError, ScepTransport};
use wiremock::matchers::{path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn request() -> EnrollmentRequest {
    EnrollmentRequest::new("CN=device03".parse().unwrap())
}

#[tokio::test]
async fn test_not_found_hint() {
    let mock = MockScepServer::start().await;
    mock.mock_server_error("GetCACert", 404, "Not Found").await;

    let err = mock.client().get_ca_certs(Some("NoSuchCA")).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(err.hint(), Some("Invalid URL or CA identifier"));
}

#[tokio::test]
async fn test_bad_request_aborts_enrollment() {
    let mock = MockScepServer::start().await;
    mock.mock_caps(MODERN_CAPS).await;
    mock.mock_ca_cert().await;
    mock.mock_server_error("PKIOperation", 400, "Template mismatch").await;
    let client = mock.client();

    let err = Enrollment::new(&client, CryptoContext::new(), mock.ca.trust(), request())
        .run()
        .await
        .unwrap_err();

    match &err {
        ScepError::ServerError { status, message } => {
            assert_eq!(*status, 400);
            assert_eq!(message, "Template mismatch");
        }
        other => panic!("Expected ServerError, got {other:?}"),
    }
    assert_eq!(
        err.hint(),
        Some("Probably a template issue, look at the PKI log")
    );
}

#[tokio::test]
async fn test_unauthorized_hint() {
    let mock = MockScepServer::start().await;
    mock.mock_caps(MODERN_CAPS).await;
    mock.mock_ca_cert().await;
    mock.mock_server_error("PKIOperation", 401, "").await;
    let client = mock.client();

    let err = Enrollment::new(&client, CryptoContext::new(), mock.ca.trust(), request())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(
        err.hint(),
        Some("Probably an invalid end entity status on the CA")
    );
}

#[tokio::test]
async fn test_request_encrypted_to_other_ca_fails() {
    let mock = MockScepServer::modern().await;
    let impostor = MockScepServer::start().await;

    // Serve the impostor's CA certificate; the real CA answers PKIOperation.
    Mock::given(path(SCEP_PATH))
        .and(query_param("operation", "GetCACert"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(der::Encode::to_der(&impostor.ca.certificate).unwrap())
                .insert_header("Content-Type", "application/x-x509-ca-cert"),
        )
        .with_priority(1)
        .mount(mock.inner())
        .await;
    let client = mock.client();

    let err = Enrollment::new(&client, CryptoContext::new(), CaTrust::InsecureAcceptAny, request())
        .run()
        .await
        .unwrap_err();

    // The real CA cannot decrypt a request addressed to the impostor.
    assert_eq!(err.status(), Some(500), "{err:?}");
}

#[tokio::test]
async fn test_wrong_pki_message_content_type() {
    let mock = MockScepServer::start().await;
    mock.mock_caps(MODERN_CAPS).await;
    mock.mock_ca_cert().await;
    Mock::given(path(SCEP_PATH))
        .and(query_param("operation", "PKIOperation"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>login</html>")
                .insert_header("Content-Type", "text/html"),
        )
        .mount(mock.inner())
        .await;
    let client = mock.client();

    let err = Enrollment::new(&client, CryptoContext::new(), mock.ca.trust(), request())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, ScepError::InvalidContentType { .. }), "{err:?}");
}
