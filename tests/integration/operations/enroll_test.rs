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

//! Integration tests for PKCSReq and GetCertInitial

use std::time::Duration;

use der::Decode;

use crate::integration::{MODERN_CAPS, MockScepServer, Reply, sign_certificate};
use usg_scep_client::csr::{DistinguishedName, challenge_passwords};
use usg_scep_client::keygen::CryptoContext;
use usg_scep_client::message::IssuerAndSubject;
use usg_scep_client::types::{FailInfo, MessageType, TransactionId};
use usg_scep_client::{
    CaTrust, Enrollment, EnrollmentRequest, EnrollmentResult, IssuedCertificate, ScepClient,
    ScepError,
};

fn request() -> EnrollmentRequest {
    EnrollmentRequest {
        challenge: Some("secret".to_string()),
        ..EnrollmentRequest::new("CN=device01,O=Example".parse().unwrap())
    }
}

async fn enroll(client: &ScepClient, trust: CaTrust) -> usg_scep_client::Result<EnrollmentResult> {
    Enrollment::new(client, CryptoContext::new(), trust, request())
        .poll_interval(Duration::from_millis(20))
        .run()
        .await
}

fn issued(result: EnrollmentResult) -> IssuedCertificate {
    match result {
        EnrollmentResult::Issued(issued) => issued,
        EnrollmentResult::Rejected { fail_info, .. } => panic!("Expected Issued, got {fail_info}"),
    }
}

#[tokio::test]
async fn test_successful_enrollment() {
    let mock = MockScepServer::modern().await;
    let client = mock.client();

    let result = enroll(&client, mock.ca.trust()).await;
    assert!(result.is_ok(), "enrollment failed: {:?}", result.as_ref().err());
    let issued = issued(result.unwrap());

    assert_eq!(issued.polls, 0);
    assert_eq!(
        issued.certificate.tbs_certificate.subject,
        *request().subject.as_name()
    );
    assert_eq!(issued.chain, vec![mock.ca.certificate.clone()]);

    let csr = mock.ca.last_csr().expect("CA saw no CSR");
    assert_eq!(challenge_passwords(&csr), vec!["secret".to_string()]);
    assert_eq!(
        csr.info.public_key,
        issued.certificate.tbs_certificate.subject_public_key_info
    );

    let received = mock.ca.received();
    assert_eq!(received.len(), 1);
    let der = der::Encode::to_der(&csr.info.public_key).unwrap();
    assert_eq!(
        received[0].message.transaction_id,
        TransactionId::from_public_key(&der)
    );
    assert_eq!(received[0].content, der::Encode::to_der(&csr).unwrap());
}

#[tokio::test]
async fn test_pending_then_success() {
    let mock = MockScepServer::modern().await;
    mock.ca.script(&[Reply::Pending, Reply::Pending]);
    let client = mock.client();

    let issued = issued(enroll(&client, mock.ca.trust()).await.unwrap());

    assert_eq!(issued.polls, 2);
    assert_eq!(
        mock.ca.message_types(),
        vec![
            MessageType::PkcsReq,
            MessageType::GetCertInitial,
            MessageType::GetCertInitial
        ]
    );

    let received = mock.ca.received();
    assert!(
        received
            .iter()
            .all(|r| r.message.transaction_id == issued.transaction_id)
    );
    // Every request carries a fresh nonce.
    assert_ne!(received[1].message.sender_nonce, received[2].message.sender_nonce);

    for poll in &received[1..] {
        let names = IssuerAndSubject::from_der(&poll.content).unwrap();
        assert_eq!(names.issuer, mock.ca.certificate.tbs_certificate.subject);
        assert_eq!(names.subject, *request().subject.as_name());
    }
}

#[tokio::test]
async fn test_immediate_failure() {
    let mock = MockScepServer::modern().await;
    mock.ca.script(&[Reply::Fail(FailInfo::BadRequest)]);
    let client = mock.client();

    let result = enroll(&client, mock.ca.trust()).await.unwrap();

    assert!(matches!(
        result,
        EnrollmentResult::Rejected {
            fail_info: FailInfo::BadRequest,
            ..
        }
    ));
    assert_eq!(mock.ca.message_types(), vec![MessageType::PkcsReq]);
}

#[tokio::test]
async fn test_rejected_while_pending() {
    let mock = MockScepServer::modern().await;
    mock.ca
        .script(&[Reply::Pending, Reply::Fail(FailInfo::BadCertId)]);
    let client = mock.client();

    let result = enroll(&client, mock.ca.trust()).await.unwrap();
    assert!(matches!(
        result,
        EnrollmentResult::Rejected {
            fail_info: FailInfo::BadCertId,
            ..
        }
    ));
}

#[tokio::test]
async fn test_get_fallback_without_post_capability() {
    let mock = MockScepServer::start().await;
    mock.mock_caps("SHA-256\nAES\n").await;
    mock.mock_ca_cert().await;
    mock.mock_pki_operation("GET").await;
    let client = mock.client();

    let issued = issued(enroll(&client, mock.ca.trust()).await.unwrap());
    assert_eq!(issued.chain.len(), 1);
    assert_eq!(mock.ca.message_types(), vec![MessageType::PkcsReq]);
}

#[tokio::test]
async fn test_legacy_ca_without_capabilities() {
    let mock = MockScepServer::start().await;
    mock.mock_caps("POSTPKIOperation\nDES3\nSHA-1\n").await;
    mock.mock_ca_cert().await;
    mock.mock_pki_operation("POST").await;
    let client = mock.client();

    let result = enroll(&client, mock.ca.trust()).await;
    assert!(matches!(result, Ok(EnrollmentResult::Issued(_))), "{result:?}");
}

#[tokio::test]
async fn test_untrusted_ca_sends_nothing() {
    let mock = MockScepServer::modern().await;
    let client = mock.client();

    let result = enroll(&client, CaTrust::Fingerprint([0x42; 32])).await;

    assert!(matches!(result, Err(ScepError::CaNotTrusted(_))), "{result:?}");
    assert!(mock.ca.received().is_empty());
}

#[tokio::test]
async fn test_foreign_ra_next_to_pinned_ca_is_ignored() {
    let mock = MockScepServer::start().await;
    mock.mock_caps(MODERN_CAPS).await;

    // Named as issued by the CA but signed by someone else.
    let attacker = CryptoContext::new().generate(2048).unwrap();
    let ra_name: DistinguishedName = "CN=Intercepting RA".parse().unwrap();
    let rogue_ra = sign_certificate(
        &attacker,
        mock.ca.certificate.tbs_certificate.subject.clone(),
        ra_name.as_name().clone(),
        attacker.subject_public_key_info().unwrap(),
    );
    mock.mock_ca_ra_certs(&[mock.ca.certificate.clone(), rogue_ra])
        .await;
    mock.mock_pki_operation("POST").await;
    let client = mock.client();

    let result = enroll(&client, mock.ca.trust()).await;
    assert!(result.is_ok(), "enrollment failed: {:?}", result.as_ref().err());

    // The CA could only read the request if it was encrypted to the CA.
    assert_eq!(mock.ca.message_types(), vec![MessageType::PkcsReq]);
    assert!(mock.ca.last_csr().is_some());
}

#[tokio::test]
async fn test_poll_limit_reached() {
    let mock = MockScepServer::modern().await;
    mock.ca.script(&[Reply::Pending; 5]);
    let client = mock.client();

    let result = Enrollment::new(&client, CryptoContext::new(), mock.ca.trust(), request())
        .poll_interval(Duration::from_millis(10))
        .max_poll_attempts(Some(2))
        .run()
        .await;

    assert!(
        matches!(result, Err(ScepError::PollLimitReached { attempts: 2 })),
        "{result:?}"
    );
    assert_eq!(mock.ca.received().len(), 3);
}
