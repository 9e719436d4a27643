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

//! Bootstrap certificate and PKCS#10 request generation.
//!
//! SCEP signs its first request with a short-lived self-signed certificate
//! over the same key that the CSR certifies. Both artifacts are assembled
//! here from their TBS structures and signed with SHA-256 / RSA.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use const_oid::ObjectIdentifier;
use const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION;
use der::asn1::{BitString, SetOfVec};
use der::{Any, Encode, Tag};
use rand::RngCore;
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::name::Name;
use x509_cert::request::{CertReq, CertReqInfo};
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};

use crate::error::{Result, ScepError};
use crate::keygen::{CryptoContext, KeyPair};
use crate::types::DigestAlgorithm;

/// PKCS#9 challengePassword (1.2.840.113549.1.9.7).
pub const PKCS_9_AT_CHALLENGE_PASSWORD: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.7");

/// Backdating applied to the bootstrap certificate's notBefore.
const CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// Lifetime of the bootstrap certificate.
const BOOTSTRAP_VALIDITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A non-empty X.500 distinguished name parsed from its RFC 4514 string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    name: Name,
    text: String,
}

impl DistinguishedName {
    /// The parsed name.
    pub fn as_name(&self) -> &Name {
        &self.name
    }
}

impl FromStr for DistinguishedName {
    type Err = ScepError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        if text.is_empty() {
            return Err(ScepError::certificate_build("Distinguished name is empty"));
        }

        let name = Name::from_str(text).map_err(|e| {
            ScepError::certificate_build(format!("Invalid distinguished name '{}': {}", text, e))
        })?;

        if name.0.is_empty() {
            return Err(ScepError::certificate_build(format!(
                "Distinguished name '{}' has no attributes",
                text
            )));
        }

        Ok(Self {
            name,
            text: text.to_string(),
        })
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Build the self-signed certificate used to sign the enrollment request.
///
/// Subject and issuer are both `subject`. The serial number is random and
/// the certificate is valid from five minutes ago for seven days.
pub fn build_self_signed(
    ctx: &CryptoContext,
    key_pair: &KeyPair,
    subject: &DistinguishedName,
) -> Result<Certificate> {
    let now = SystemTime::now();
    let validity = Validity {
        not_before: time_at(now - CLOCK_SKEW)?,
        not_after: time_at(now + BOOTSTRAP_VALIDITY)?,
    };

    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: random_serial(ctx)?,
        signature: signature_algorithm(),
        issuer: subject.as_name().clone(),
        validity,
        subject: subject.as_name().clone(),
        subject_public_key_info: key_pair.subject_public_key_info()?,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };

    let tbs_der = tbs_certificate
        .to_der()
        .map_err(|e| ScepError::certificate_build(format!("Failed to encode certificate: {}", e)))?;
    let signature = key_pair.sign(DigestAlgorithm::Sha256, &tbs_der)?;

    Ok(Certificate {
        tbs_certificate,
        signature_algorithm: signature_algorithm(),
        signature: BitString::from_bytes(&signature)?,
    })
}

/// Builder for PKCS#10 Certificate Signing Requests.
///
/// # Example
///
/// ```no_run
/// use usg_scep_client::csr::{CsrBuilder, DistinguishedName};
/// use usg_scep_client::keygen::CryptoContext;
///
/// # fn example() -> usg_scep_client::Result<()> {
/// let key_pair = CryptoContext::new().generate(2048)?;
/// let subject: DistinguishedName = "CN=device01,O=Example".parse()?;
/// let csr = CsrBuilder::new(&subject)
///     .challenge_password("secret")
///     .build(&key_pair)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CsrBuilder {
    subject: Name,
    challenge_password: Option<String>,
}

impl CsrBuilder {
    /// Create a builder for `subject`.
    pub fn new(subject: &DistinguishedName) -> Self {
        Self {
            subject: subject.as_name().clone(),
            challenge_password: None,
        }
    }

    /// Add a challengePassword attribute.
    pub fn challenge_password(mut self, password: impl Into<String>) -> Self {
        self.challenge_password = Some(password.into());
        self
    }

    /// Assemble and sign the request with `key_pair`.
    pub fn build(self, key_pair: &KeyPair) -> Result<CertReq> {
        let mut attributes = SetOfVec::new();
        if let Some(password) = &self.challenge_password {
            attributes.insert(challenge_password_attribute(password)?)?;
        }

        let info = CertReqInfo {
            version: x509_cert::request::Version::V1,
            subject: self.subject,
            public_key: key_pair.subject_public_key_info()?,
            attributes,
        };

        let info_der = info
            .to_der()
            .map_err(|e| ScepError::certificate_build(format!("Failed to encode CSR: {}", e)))?;
        let signature = key_pair.sign(DigestAlgorithm::Sha256, &info_der)?;

        Ok(CertReq {
            info,
            algorithm: signature_algorithm(),
            signature: BitString::from_bytes(&signature)?,
        })
    }
}

/// Build a signed CSR for `subject`, with a challengePassword attribute
/// only when `challenge` is present.
pub fn build_csr(
    key_pair: &KeyPair,
    subject: &DistinguishedName,
    challenge: Option<&str>,
) -> Result<CertReq> {
    let mut builder = CsrBuilder::new(subject);
    if let Some(challenge) = challenge {
        builder = builder.challenge_password(challenge);
    }
    builder.build(key_pair)
}

/// challengePassword values carried by `csr`.
pub fn challenge_passwords(csr: &CertReq) -> Vec<String> {
    csr.info
        .attributes
        .iter()
        .filter(|attr| attr.oid == PKCS_9_AT_CHALLENGE_PASSWORD)
        .flat_map(|attr| attr.values.iter())
        .filter_map(|value| std::str::from_utf8(value.value()).ok())
        .map(str::to_string)
        .collect()
}

fn challenge_password_attribute(password: &str) -> Result<Attribute> {
    // DirectoryString: PrintableString when possible, UTF8String otherwise.
    let tag = if password.chars().all(is_printable) {
        Tag::PrintableString
    } else {
        Tag::Utf8String
    };

    let mut values = SetOfVec::new();
    values.insert(Any::new(tag, password.as_bytes())?)?;

    Ok(Attribute {
        oid: PKCS_9_AT_CHALLENGE_PASSWORD,
        values,
    })
}

fn is_printable(c: char) -> bool {
    c.is_ascii_alphanumeric() || " '()+,-./:=?".contains(c)
}

pub(crate) fn signature_algorithm() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: SHA_256_WITH_RSA_ENCRYPTION,
        parameters: Some(Any::null()),
    }
}

pub(crate) fn random_serial(ctx: &CryptoContext) -> Result<SerialNumber> {
    let mut bytes = [0u8; 16];
    ctx.rng().fill_bytes(&mut bytes);
    // Positive and minimally encoded.
    bytes[0] &= 0x7F;
    if bytes[0] == 0 {
        bytes[0] = 0x01;
    }
    Ok(SerialNumber::new(&bytes)?)
}

fn time_at(instant: SystemTime) -> Result<Time> {
    Time::try_from(instant)
        .map_err(|e| ScepError::certificate_build(format!("Invalid validity time: {}", e)))
}
