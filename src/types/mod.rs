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

//! SCEP message types and protocol constants.
//!
//! This module provides the values carried in pkiMessage authenticated
//! attributes (message type, status, failure info, transaction ID, nonces),
//! the enrollment outcome returned by the transport, and the CA certificate
//! and capability sets returned by GetCACert / GetCACaps.

mod pkcs7;

pub use pkcs7::{CaCertificates, build_certs_only, parse_certs_only, parse_degenerate};
pub(crate) use pkcs7::extract_signed_data;

use std::fmt;

use const_oid::ObjectIdentifier;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x509_cert::Certificate;

use crate::error::{Result, ScepError};

/// Outcome of a PKCSReq or GetCertInitial exchange.
#[derive(Debug, Clone)]
pub enum EnrollmentOutcome {
    /// The CA issued a certificate.
    Success {
        /// Certificates returned by the CA, in the order received.
        certificates: Vec<Certificate>,
    },

    /// The request awaits CA approval; poll with the same transaction ID.
    Pending {
        /// Transaction to poll.
        transaction_id: TransactionId,
    },

    /// The CA rejected the request.
    Failure {
        /// Reason supplied by the CA.
        fail_info: FailInfo,
    },
}

impl EnrollmentOutcome {
    /// Returns true if the request is pending.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Returns true if a certificate was issued.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// SCEP transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(String);

impl TransactionId {
    /// Wrap a transaction ID assigned elsewhere.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the transaction ID from a DER-encoded public key.
    ///
    /// The ID is the uppercase hex SHA-256 digest of the key, so it is
    /// stable for the lifetime of the key pair.
    pub fn from_public_key(public_key_der: &[u8]) -> Self {
        let hash = Sha256::digest(public_key_der);
        Self(hash.iter().map(|b| format!("{:02X}", b)).collect())
    }

    /// The ID as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 16-byte sender / recipient nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; 16]);

impl Nonce {
    /// Generate a fresh random nonce.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a nonce from raw attribute bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| ScepError::message(format!("Nonce must be 16 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

/// pkiMessage messageType attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Response to any request.
    CertRep,
    /// Certificate enrollment request.
    PkcsReq,
    /// Poll for a pending enrollment.
    GetCertInitial,
    /// Retrieve a certificate by issuer and serial.
    GetCert,
    /// Retrieve a CRL.
    GetCrl,
}

impl MessageType {
    /// Wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CertRep => "3",
            Self::PkcsReq => "19",
            Self::GetCertInitial => "20",
            Self::GetCert => "21",
            Self::GetCrl => "22",
        }
    }

    /// Parse a wire value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "3" => Some(Self::CertRep),
            "19" => Some(Self::PkcsReq),
            "20" => Some(Self::GetCertInitial),
            "21" => Some(Self::GetCert),
            "22" => Some(Self::GetCrl),
            _ => None,
        }
    }
}

/// pkiStatus attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkiStatus {
    /// Request granted.
    Success,
    /// Request rejected.
    Failure,
    /// Request awaiting approval.
    Pending,
}

impl PkiStatus {
    /// Wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "0",
            Self::Failure => "2",
            Self::Pending => "3",
        }
    }

    /// Parse a wire value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "0" => Some(Self::Success),
            "2" => Some(Self::Failure),
            "3" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// failInfo attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailInfo {
    /// Unrecognized or unsupported algorithm.
    BadAlg,
    /// Integrity check failed.
    BadMessageCheck,
    /// Transaction not permitted or supported.
    BadRequest,
    /// signingTime was not close enough to the CA's clock.
    BadTime,
    /// No certificate could be identified matching the criteria.
    BadCertId,
}

impl FailInfo {
    /// Wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadAlg => "0",
            Self::BadMessageCheck => "1",
            Self::BadRequest => "2",
            Self::BadTime => "3",
            Self::BadCertId => "4",
        }
    }

    /// Parse a wire value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "0" => Some(Self::BadAlg),
            "1" => Some(Self::BadMessageCheck),
            "2" => Some(Self::BadRequest),
            "3" => Some(Self::BadTime),
            "4" => Some(Self::BadCertId),
            _ => None,
        }
    }
}

impl fmt::Display for FailInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BadAlg => "badAlg",
            Self::BadMessageCheck => "badMessageCheck",
            Self::BadRequest => "badRequest",
            Self::BadTime => "badTime",
            Self::BadCertId => "badCertId",
        };
        f.write_str(name)
    }
}

/// Message digest used for pkiMessage signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-1 (legacy CAs only).
    Sha1,
    /// SHA-256.
    Sha256,
}

impl DigestAlgorithm {
    /// Digest algorithm OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::Sha1 => const_oid::db::rfc5912::ID_SHA_1,
            Self::Sha256 => const_oid::db::rfc5912::ID_SHA_256,
        }
    }

    /// Matching RSA PKCS#1 v1.5 signature algorithm OID.
    pub fn rsa_signature_oid(&self) -> ObjectIdentifier {
        match self {
            Self::Sha1 => const_oid::db::rfc5912::SHA_1_WITH_RSA_ENCRYPTION,
            Self::Sha256 => const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
        }
    }

    /// Look up a digest algorithm by OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == const_oid::db::rfc5912::ID_SHA_1 {
            Some(Self::Sha1)
        } else if *oid == const_oid::db::rfc5912::ID_SHA_256 {
            Some(Self::Sha256)
        } else {
            None
        }
    }

    /// Digest used by an RSA PKCS#1 v1.5 signature algorithm OID.
    pub fn from_signature_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [Self::Sha1, Self::Sha256]
            .into_iter()
            .find(|alg| alg.rsa_signature_oid() == *oid)
    }

    /// Hash `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => sha1::Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Content encryption algorithm for the pkcsPKIEnvelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncryption {
    /// AES-128-CBC
    Aes128Cbc,
    /// Triple DES (3DES) CBC
    TripleDesCbc,
}

impl ContentEncryption {
    /// Algorithm OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::Aes128Cbc => const_oid::db::rfc5911::ID_AES_128_CBC,
            Self::TripleDesCbc => ObjectIdentifier::new_unwrap("1.2.840.113549.3.7"),
        }
    }

    /// Look up an algorithm by OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == Self::Aes128Cbc.oid() {
            Some(Self::Aes128Cbc)
        } else if *oid == Self::TripleDesCbc.oid() {
            Some(Self::TripleDesCbc)
        } else {
            None
        }
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::TripleDesCbc => 24,
        }
    }

    /// Block (and IV) size in bytes.
    pub fn block_size(&self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::TripleDesCbc => 8,
        }
    }
}

/// Capabilities advertised by a CA through GetCACaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaCapabilities {
    caps: Vec<String>,
}

impl CaCapabilities {
    /// Parse a GetCACaps response body (one keyword per line).
    pub fn parse(body: &str) -> Self {
        let caps = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| l.to_ascii_uppercase())
            .collect();
        Self { caps }
    }

    /// Returns true if the keyword is advertised (case-insensitive).
    pub fn supports(&self, keyword: &str) -> bool {
        let keyword = keyword.to_ascii_uppercase();
        self.caps.iter().any(|c| *c == keyword)
    }

    /// RFC 8894 servers advertise SCEPStandard, which implies AES,
    /// POSTPKIOperation and SHA-256.
    fn is_standard(&self) -> bool {
        self.supports("SCEPStandard")
    }

    /// Whether PKIOperation may be sent with HTTP POST.
    pub fn post_supported(&self) -> bool {
        self.is_standard() || self.supports("POSTPKIOperation")
    }

    /// Strongest supported signature digest.
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        if self.is_standard() || self.supports("SHA-256") {
            DigestAlgorithm::Sha256
        } else if self.caps.is_empty() {
            // No capabilities advertised: assume a modern CA.
            DigestAlgorithm::Sha256
        } else {
            DigestAlgorithm::Sha1
        }
    }

    /// Strongest supported content encryption.
    pub fn content_encryption(&self) -> ContentEncryption {
        if self.is_standard() || self.supports("AES") || self.caps.is_empty() {
            ContentEncryption::Aes128Cbc
        } else {
            ContentEncryption::TripleDesCbc
        }
    }
}

/// Content types used in the SCEP protocol.
pub mod content_types {
    /// Single DER CA certificate.
    pub const CA_CERT: &str = "application/x-x509-ca-cert";

    /// Degenerate PKCS#7 with CA and RA certificates.
    pub const CA_RA_CERT: &str = "application/x-x509-ca-ra-cert";

    /// DER pkiMessage.
    pub const PKI_MESSAGE: &str = "application/x-pki-message";

    /// GetCACaps response.
    pub const TEXT_PLAIN: &str = "text/plain";
}

/// SCEP `operation` query parameter values.
pub mod operations {
    /// CA certificate retrieval.
    pub const GET_CA_CERT: &str = "GetCACert";

    /// CA capability discovery.
    pub const GET_CA_CAPS: &str = "GetCACaps";

    /// pkiMessage exchange.
    pub const PKI_OPERATION: &str = "PKIOperation";
}
