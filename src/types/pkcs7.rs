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

//! PKCS#7/CMS degenerate SignedData handling.
//!
//! SCEP returns certificate chains and CRLs inside "certs-only" SignedData
//! structures with no content and no signers.

use cms::cert::CertificateChoices;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::revocation::{RevocationInfoChoice, RevocationInfoChoices};
use cms::signed_data::{CertificateSet, EncapsulatedContentInfo, SignedData, SignerInfos};
use const_oid::db::rfc5911::{ID_DATA, ID_SIGNED_DATA};
use der::asn1::SetOfVec;
use der::{Any, Decode, Encode};
use x509_cert::Certificate;
use x509_cert::crl::CertificateList;
use x509_cert::name::Name;

use crate::error::{Result, ScepError};

/// CA certificates returned by GetCACert.
#[derive(Debug, Clone, Default)]
pub struct CaCertificates {
    /// The CA (and RA) certificates.
    pub certificates: Vec<Certificate>,
}

impl CaCertificates {
    /// Create a new CA certificates collection.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Returns the number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Iterate over the certificates.
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter()
    }

    /// Certificate that request envelopes are encrypted to.
    ///
    /// With an RA in front of the CA the RA certificate is the only one
    /// not self-issued; otherwise the CA certificate itself is used.
    pub fn recipient(&self) -> Option<&Certificate> {
        self.certificates
            .iter()
            .find(|c| !is_self_issued(c))
            .or_else(|| self.certificates.first())
    }

    /// Name of the issuing CA, used in GetCertInitial.
    pub fn issuer_name(&self) -> Option<&Name> {
        self.recipient().map(|c| {
            if is_self_issued(c) {
                &c.tbs_certificate.subject
            } else {
                &c.tbs_certificate.issuer
            }
        })
    }
}

impl IntoIterator for CaCertificates {
    type Item = Certificate;
    type IntoIter = std::vec::IntoIter<Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.into_iter()
    }
}

impl<'a> IntoIterator for &'a CaCertificates {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.iter()
    }
}

fn is_self_issued(cert: &Certificate) -> bool {
    cert.tbs_certificate.subject == cert.tbs_certificate.issuer
}

/// Parse the certificates out of a DER PKCS#7 SignedData.
pub fn parse_certs_only(der: &[u8]) -> Result<Vec<Certificate>> {
    let (certificates, _) = parse_degenerate(der)?;
    Ok(certificates)
}

/// Parse the certificates and CRLs out of a DER PKCS#7 SignedData.
pub fn parse_degenerate(der: &[u8]) -> Result<(Vec<Certificate>, Vec<CertificateList>)> {
    let content_info = ContentInfo::from_der(der)
        .map_err(|e| ScepError::message(format!("Failed to parse ContentInfo: {}", e)))?;

    let signed_data = extract_signed_data(&content_info)?;

    let mut certificates = Vec::new();
    if let Some(cert_set) = &signed_data.certificates {
        for choice in cert_set.0.iter() {
            match choice {
                CertificateChoices::Certificate(cert) => certificates.push(cert.clone()),
                _ => tracing::warn!("Skipping non-X.509 certificate in SignedData"),
            }
        }
    }

    let mut crls = Vec::new();
    if let Some(revocation) = &signed_data.crls {
        for choice in revocation.0.iter() {
            match choice {
                RevocationInfoChoice::Crl(crl) => crls.push(crl.clone()),
                _ => tracing::warn!("Skipping non-CRL revocation info in SignedData"),
            }
        }
    }

    Ok((certificates, crls))
}

/// Extract SignedData from ContentInfo.
pub(crate) fn extract_signed_data(content_info: &ContentInfo) -> Result<SignedData> {
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(ScepError::message(format!(
            "Expected SignedData OID, got {}",
            content_info.content_type
        )));
    }

    let content = content_info
        .content
        .to_der()
        .map_err(|e| ScepError::message(format!("Failed to encode content: {}", e)))?;

    SignedData::from_der(&content)
        .map_err(|e| ScepError::message(format!("Failed to parse SignedData: {}", e)))
}

/// Build a DER degenerate SignedData carrying `certificates` and `crls`.
pub fn build_certs_only(certificates: &[Certificate], crls: &[CertificateList]) -> Result<Vec<u8>> {
    let mut cert_set = SetOfVec::new();
    for cert in certificates {
        cert_set.insert(CertificateChoices::Certificate(cert.clone()))?;
    }

    let mut crl_set = SetOfVec::new();
    for crl in crls {
        crl_set.insert(RevocationInfoChoice::Crl(crl.clone()))?;
    }

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: (!certificates.is_empty()).then_some(CertificateSet(cert_set)),
        crls: (!crls.is_empty()).then_some(RevocationInfoChoices(crl_set)),
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };

    Ok(content_info.to_der()?)
}
