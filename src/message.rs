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

//! SCEP pkiMessage construction and parsing.
//!
//! A pkiMessage is a CMS SignedData whose signed attributes carry the SCEP
//! transaction state and whose content, when present, is a CMS
//! EnvelopedData (the pkcsPKIEnvelope) encrypted to the peer.
//!
//! ```text
//! ContentInfo(SignedData)
//!   signerInfo.signedAttrs: messageType, transactionID, senderNonce, ...
//!   encapContentInfo: ContentInfo(EnvelopedData)
//!     KeyTransRecipientInfo (RSA PKCS#1 v1.5)
//!     EncryptedContentInfo (AES-128-CBC or DES-EDE3-CBC)
//! ```

use std::time::SystemTime;

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::enveloped_data::{
    EncryptedContentInfo, EnvelopedData, KeyTransRecipientInfo, RecipientIdentifier,
    RecipientInfo, RecipientInfos,
};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use const_oid::ObjectIdentifier;
use const_oid::db::rfc5911::{ID_CONTENT_TYPE, ID_DATA, ID_ENVELOPED_DATA, ID_MESSAGE_DIGEST, ID_SIGNED_DATA, ID_SIGNING_TIME};
use const_oid::db::rfc5912::RSA_ENCRYPTION;
use der::asn1::{OctetString, SetOfVec};
use der::{Any, Decode, Encode, Sequence, Tag, Tagged};
use rand::RngCore;
use rand::rngs::OsRng;
use spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;
use x509_cert::attr::Attribute;
use x509_cert::crl::CertificateList;
use x509_cert::name::Name;
use x509_cert::time::Time;

use crate::error::{Result, ScepError};
use crate::keygen::{self, KeyPair};
use crate::types::{
    ContentEncryption, DigestAlgorithm, FailInfo, MessageType, Nonce, PkiStatus, TransactionId,
    extract_signed_data, parse_degenerate,
};

/// id-messageType
pub const OID_MESSAGE_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.2");
/// id-pkiStatus
pub const OID_PKI_STATUS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.3");
/// id-failInfo
pub const OID_FAIL_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.4");
/// id-senderNonce
pub const OID_SENDER_NONCE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.5");
/// id-recipientNonce
pub const OID_RECIPIENT_NONCE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.6");
/// id-transactionID
pub const OID_TRANSACTION_ID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.7");

/// GetCertInitial message data.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct IssuerAndSubject {
    /// Issuing CA name.
    pub issuer: Name,
    /// Requested subject name.
    pub subject: Name,
}

/// Issuer and serial number identifying `cert`.
pub fn issuer_and_serial(cert: &Certificate) -> IssuerAndSerialNumber {
    IssuerAndSerialNumber {
        issuer: cert.tbs_certificate.issuer.clone(),
        serial_number: cert.tbs_certificate.serial_number.clone(),
    }
}

// ============================================================================
// pkcsPKIEnvelope
// ============================================================================

/// Encrypt `content` to `recipient` as a DER ContentInfo(EnvelopedData).
pub fn envelope(
    content: &[u8],
    recipient: &Certificate,
    encryption: ContentEncryption,
) -> Result<Vec<u8>> {
    let mut key = vec![0u8; encryption.key_size()];
    OsRng.fill_bytes(&mut key);
    let mut iv = vec![0u8; encryption.block_size()];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = encrypt_content(encryption, &key, &iv, content)?;
    let encrypted_key = keygen::encrypt_to(&keygen::certificate_public_key(recipient)?, &key)?;

    let ktri = KeyTransRecipientInfo {
        version: CmsVersion::V0,
        rid: RecipientIdentifier::IssuerAndSerialNumber(issuer_and_serial(recipient)),
        key_enc_alg: AlgorithmIdentifierOwned {
            oid: RSA_ENCRYPTION,
            parameters: Some(Any::null()),
        },
        enc_key: OctetString::new(encrypted_key)?,
    };

    let mut recip_infos = SetOfVec::new();
    recip_infos.insert(RecipientInfo::Ktri(ktri))?;

    let enveloped = EnvelopedData {
        version: CmsVersion::V0,
        originator_info: None,
        recip_infos: RecipientInfos(recip_infos),
        encrypted_content: EncryptedContentInfo {
            content_type: ID_DATA,
            content_enc_alg: AlgorithmIdentifierOwned {
                oid: encryption.oid(),
                parameters: Some(Any::new(Tag::OctetString, iv)?),
            },
            encrypted_content: Some(OctetString::new(ciphertext)?),
        },
        unprotected_attrs: None,
    };

    let content_info = ContentInfo {
        content_type: ID_ENVELOPED_DATA,
        content: Any::encode_from(&enveloped)?,
    };
    Ok(content_info.to_der()?)
}

/// Decrypt a DER ContentInfo(EnvelopedData) addressed to `key_pair`.
pub fn open_envelope(der: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>> {
    let content_info = ContentInfo::from_der(der)
        .map_err(|e| ScepError::message(format!("Failed to parse envelope: {}", e)))?;
    if content_info.content_type != ID_ENVELOPED_DATA {
        return Err(ScepError::message(format!(
            "Expected EnvelopedData OID, got {}",
            content_info.content_type
        )));
    }

    let enveloped = EnvelopedData::from_der(&content_info.content.to_der()?)
        .map_err(|e| ScepError::message(format!("Failed to parse EnvelopedData: {}", e)))?;

    let algorithm = &enveloped.encrypted_content.content_enc_alg;
    let encryption = ContentEncryption::from_oid(&algorithm.oid).ok_or_else(|| {
        ScepError::message(format!("Unsupported content encryption {}", algorithm.oid))
    })?;
    let iv = match &algorithm.parameters {
        Some(params) if params.tag() == Tag::OctetString => params.value(),
        _ => return Err(ScepError::message("Missing content encryption IV")),
    };
    let ciphertext = enveloped
        .encrypted_content
        .encrypted_content
        .as_ref()
        .ok_or_else(|| ScepError::message("Envelope has no encrypted content"))?
        .as_bytes();

    let mut last_error = None;
    for recipient in enveloped.recip_infos.0.iter() {
        let RecipientInfo::Ktri(ktri) = recipient else {
            continue;
        };
        match key_pair.decrypt(ktri.enc_key.as_bytes()) {
            Ok(key) => return decrypt_content(encryption, &key, iv, ciphertext),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| ScepError::message("No key transport recipient in envelope")))
}

fn encrypt_content(alg: ContentEncryption, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let invalid = |_| ScepError::message(format!("Invalid key or IV length for {:?}", alg));
    Ok(match alg {
        ContentEncryption::Aes128Cbc => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        ContentEncryption::TripleDesCbc => cbc::Encryptor::<des::TdesEde3>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
    })
}

fn decrypt_content(alg: ContentEncryption, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let invalid = |_| ScepError::message(format!("Invalid key or IV length for {:?}", alg));
    let unpad = |_| ScepError::message("Envelope decryption failed: bad padding");
    match alg {
        ContentEncryption::Aes128Cbc => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(unpad),
        ContentEncryption::TripleDesCbc => cbc::Decryptor::<des::TdesEde3>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(unpad),
    }
}


// ============================================================================
// Signed pkiMessage
// ============================================================================

/// The SCEP transaction state carried by a pkiMessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiMessage {
    /// messageType attribute.
    pub message_type: MessageType,
    /// transactionID attribute.
    pub transaction_id: TransactionId,
    /// senderNonce attribute.
    pub sender_nonce: Nonce,
    /// recipientNonce attribute (responses only).
    pub recipient_nonce: Option<Nonce>,
    /// pkiStatus attribute (responses only).
    pub pki_status: Option<PkiStatus>,
    /// failInfo attribute (failed responses only).
    pub fail_info: Option<FailInfo>,
    /// DER pkcsPKIEnvelope, when the message carries one.
    pub envelope: Option<Vec<u8>>,
}

impl PkiMessage {
    /// New request with a fresh sender nonce.
    pub fn request(
        message_type: MessageType,
        transaction_id: TransactionId,
        envelope: Vec<u8>,
    ) -> Self {
        Self {
            message_type,
            transaction_id,
            sender_nonce: Nonce::random(),
            recipient_nonce: None,
            pki_status: None,
            fail_info: None,
            envelope: Some(envelope),
        }
    }

    /// CertRep answering `request` with `status`.
    pub fn cert_rep(request: &PkiMessage, status: PkiStatus) -> Self {
        Self {
            message_type: MessageType::CertRep,
            transaction_id: request.transaction_id.clone(),
            sender_nonce: Nonce::random(),
            recipient_nonce: Some(request.sender_nonce),
            pki_status: Some(status),
            fail_info: None,
            envelope: None,
        }
    }

    /// Set the failInfo attribute.
    pub fn with_fail_info(mut self, fail_info: FailInfo) -> Self {
        self.fail_info = Some(fail_info);
        self
    }

    /// Set the pkcsPKIEnvelope.
    pub fn with_envelope(mut self, envelope: Vec<u8>) -> Self {
        self.envelope = Some(envelope);
        self
    }

    /// Sign the message as a DER ContentInfo(SignedData).
    ///
    /// `signer` is included in the certificate set together with `extra`.
    pub fn sign(
        &self,
        signer: &Certificate,
        key_pair: &KeyPair,
        digest: DigestAlgorithm,
        extra: &[Certificate],
    ) -> Result<Vec<u8>> {
        let content = self.envelope.as_deref().unwrap_or_default();
        let signed_attrs = self.signed_attributes(digest, content)?;
        let signature = key_pair.sign(digest, &signed_attrs.to_der()?)?;

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(issuer_and_serial(signer)),
            digest_alg: AlgorithmIdentifierOwned {
                oid: digest.oid(),
                parameters: None,
            },
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: RSA_ENCRYPTION,
                parameters: Some(Any::null()),
            },
            signature: OctetString::new(signature)?,
            unsigned_attrs: None,
        };

        let mut digest_algorithms = SetOfVec::new();
        digest_algorithms.insert(AlgorithmIdentifierOwned {
            oid: digest.oid(),
            parameters: None,
        })?;

        let mut certificates = SetOfVec::new();
        let mut seen: Vec<&Certificate> = Vec::new();
        for cert in std::iter::once(signer).chain(extra) {
            if !seen.contains(&cert) {
                certificates.insert(CertificateChoices::Certificate(cert.clone()))?;
                seen.push(cert);
            }
        }

        let mut signer_infos = SetOfVec::new();
        signer_infos.insert(signer_info)?;

        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ID_DATA,
                econtent: self
                    .envelope
                    .as_ref()
                    .map(|e| Any::new(Tag::OctetString, e.as_slice()))
                    .transpose()?,
            },
            certificates: Some(CertificateSet(certificates)),
            crls: None,
            signer_infos: SignerInfos(signer_infos),
        };

        let content_info = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        };
        Ok(content_info.to_der()?)
    }

    fn signed_attributes(&self, digest: DigestAlgorithm, content: &[u8]) -> Result<SetOfVec<Attribute>> {
        let mut attrs = SetOfVec::new();
        attrs.insert(attribute(ID_CONTENT_TYPE, Any::encode_from(&ID_DATA)?)?)?;
        attrs.insert(attribute(
            ID_MESSAGE_DIGEST,
            Any::new(Tag::OctetString, digest.digest(content))?,
        )?)?;
        attrs.insert(attribute(
            ID_SIGNING_TIME,
            Any::encode_from(&Time::try_from(SystemTime::now())?)?,
        )?)?;
        attrs.insert(printable(OID_MESSAGE_TYPE, self.message_type.as_str())?)?;
        attrs.insert(printable(OID_TRANSACTION_ID, self.transaction_id.as_str())?)?;
        attrs.insert(octets(OID_SENDER_NONCE, &self.sender_nonce.0)?)?;
        if let Some(nonce) = &self.recipient_nonce {
            attrs.insert(octets(OID_RECIPIENT_NONCE, &nonce.0)?)?;
        }
        if let Some(status) = &self.pki_status {
            attrs.insert(printable(OID_PKI_STATUS, status.as_str())?)?;
        }
        if let Some(fail_info) = &self.fail_info {
            attrs.insert(printable(OID_FAIL_INFO, fail_info.as_str())?)?;
        }
        Ok(attrs)
    }

    /// Verify and decode a DER pkiMessage.
    ///
    /// The signer must be one of `trusted`; certificates embedded in the
    /// message are not used to establish the signer.
    pub fn decode(der: &[u8], trusted: &[Certificate]) -> Result<Self> {
        let content_info = ContentInfo::from_der(der)
            .map_err(|e| ScepError::message(format!("Failed to parse pkiMessage: {}", e)))?;
        let signed_data = extract_signed_data(&content_info)?;

        let signer_info = signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| ScepError::message("pkiMessage has no signer"))?;

        let SignerIdentifier::IssuerAndSerialNumber(sid) = &signer_info.sid else {
            return Err(ScepError::message("Unsupported signer identifier"));
        };
        let signer = trusted
            .iter()
            .find(|c| {
                c.tbs_certificate.issuer == sid.issuer
                    && c.tbs_certificate.serial_number == sid.serial_number
            })
            .ok_or_else(|| ScepError::signature("Signer is not a trusted certificate"))?;

        let digest = DigestAlgorithm::from_oid(&signer_info.digest_alg.oid).ok_or_else(|| {
            ScepError::signature(format!("Unsupported digest {}", signer_info.digest_alg.oid))
        })?;
        let signed_attrs = signer_info
            .signed_attrs
            .as_ref()
            .ok_or_else(|| ScepError::message("pkiMessage has no signed attributes"))?;

        keygen::verify_signature(
            &keygen::certificate_public_key(signer)?,
            digest,
            &signed_attrs.to_der()?,
            signer_info.signature.as_bytes(),
        )?;

        let envelope = signed_data
            .encap_content_info
            .econtent
            .as_ref()
            .map(|any| any.value().to_vec());
        let expected_digest = digest.digest(envelope.as_deref().unwrap_or_default());

        let mut message_digest = None;
        let mut message_type = None;
        let mut transaction_id = None;
        let mut sender_nonce = None;
        let mut recipient_nonce = None;
        let mut pki_status = None;
        let mut fail_info = None;

        for attr in signed_attrs.iter() {
            let Some(value) = attr.values.iter().next() else {
                continue;
            };
            if attr.oid == ID_MESSAGE_DIGEST {
                message_digest = Some(value.value().to_vec());
            } else if attr.oid == OID_MESSAGE_TYPE {
                let text = text_value(value)?;
                message_type = Some(MessageType::parse(text).ok_or_else(|| {
                    ScepError::message(format!("Unknown messageType '{}'", text))
                })?);
            } else if attr.oid == OID_TRANSACTION_ID {
                transaction_id = Some(TransactionId::new(text_value(value)?));
            } else if attr.oid == OID_SENDER_NONCE {
                sender_nonce = Some(Nonce::from_slice(value.value())?);
            } else if attr.oid == OID_RECIPIENT_NONCE {
                recipient_nonce = Some(Nonce::from_slice(value.value())?);
            } else if attr.oid == OID_PKI_STATUS {
                let text = text_value(value)?;
                pki_status = Some(PkiStatus::parse(text).ok_or_else(|| {
                    ScepError::message(format!("Unknown pkiStatus '{}'", text))
                })?);
            } else if attr.oid == OID_FAIL_INFO {
                let text = text_value(value)?;
                fail_info = FailInfo::parse(text);
                if fail_info.is_none() {
                    tracing::warn!("Unknown failInfo '{}'", text);
                }
            }
        }

        if message_digest.as_deref() != Some(expected_digest.as_slice()) {
            return Err(ScepError::signature("messageDigest does not match content"));
        }

        Ok(Self {
            message_type: message_type
                .ok_or_else(|| ScepError::message("pkiMessage has no messageType"))?,
            transaction_id: transaction_id
                .ok_or_else(|| ScepError::message("pkiMessage has no transactionID"))?,
            sender_nonce: sender_nonce
                .ok_or_else(|| ScepError::message("pkiMessage has no senderNonce"))?,
            recipient_nonce,
            pki_status,
            fail_info,
            envelope,
        })
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    let mut values = SetOfVec::new();
    values.insert(value)?;
    Ok(Attribute { oid, values })
}

fn printable(oid: ObjectIdentifier, value: &str) -> Result<Attribute> {
    attribute(oid, Any::new(Tag::PrintableString, value.as_bytes())?)
}

fn octets(oid: ObjectIdentifier, value: &[u8]) -> Result<Attribute> {
    attribute(oid, Any::new(Tag::OctetString, value)?)
}

fn text_value(value: &Any) -> Result<&str> {
    std::str::from_utf8(value.value())
        .map_err(|_| ScepError::message("Attribute value is not valid text"))
}

// ============================================================================
// CertRep
// ============================================================================

/// Decoded content of a CertRep.
#[derive(Debug, Clone)]
pub enum CertRep {
    /// Issued certificates and/or CRLs.
    Success {
        /// Certificates in the order received.
        certificates: Vec<Certificate>,
        /// CRLs (GetCRL responses).
        crls: Vec<CertificateList>,
    },
    /// Request still pending.
    Pending,
    /// Request rejected.
    Failure(FailInfo),
}

/// Verify a CertRep against the request that produced it and decrypt its
/// content with `key_pair`.
pub fn decode_cert_rep(
    der: &[u8],
    request: &PkiMessage,
    ca_certs: &[Certificate],
    key_pair: &KeyPair,
) -> Result<CertRep> {
    let response = PkiMessage::decode(der, ca_certs)?;

    if response.message_type != MessageType::CertRep {
        return Err(ScepError::message(format!(
            "Expected CertRep, got messageType {}",
            response.message_type.as_str()
        )));
    }
    if response.transaction_id != request.transaction_id {
        return Err(ScepError::message(format!(
            "transactionID mismatch: sent {}, received {}",
            request.transaction_id, response.transaction_id
        )));
    }
    if response.recipient_nonce != Some(request.sender_nonce) {
        return Err(ScepError::message("recipientNonce does not match senderNonce"));
    }

    match response.pki_status {
        Some(PkiStatus::Success) => {
            let envelope = response
                .envelope
                .ok_or_else(|| ScepError::message("Successful CertRep has no content"))?;
            let inner = open_envelope(&envelope, key_pair)?;
            let (certificates, crls) = parse_degenerate(&inner)?;
            Ok(CertRep::Success { certificates, crls })
        }
        Some(PkiStatus::Pending) => Ok(CertRep::Pending),
        Some(PkiStatus::Failure) => Ok(CertRep::Failure(response.fail_info.unwrap_or_else(|| {
            tracing::warn!("CertRep FAILURE without failInfo, assuming badRequest");
            FailInfo::BadRequest
        }))),
        None => Err(ScepError::message("CertRep has no pkiStatus")),
    }
}
