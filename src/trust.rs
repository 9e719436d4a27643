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

//! CA trust decision.
//!
//! The CA certificates returned by GetCACert arrive over an unauthenticated
//! channel. Before anything is encrypted to them the orchestrator asks a
//! [`CaTrust`] value whether they are acceptable: either one of them matches
//! a pinned SHA-256 fingerprint, or the operator explicitly opted out of
//! verification. A pinned set is narrowed to the certificates the pinned
//! one vouches for.

use std::fmt;
use std::str::FromStr;

use der::Encode;
use sha2::{Digest, Sha256};
use x509_cert::Certificate;

use crate::error::{Result, ScepError};
use crate::keygen;
use crate::types::CaCertificates;

/// How CA certificates fetched from the server are trusted.
#[derive(Clone, PartialEq, Eq)]
pub enum CaTrust {
    /// Trust the set if any certificate has this SHA-256 fingerprint.
    Fingerprint([u8; 32]),

    /// Trust whatever the server returns.
    ///
    /// # Security Warning
    ///
    /// Anyone able to intercept the connection can substitute their own CA.
    InsecureAcceptAny,
}

impl fmt::Debug for CaTrust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fingerprint(fp) => write!(f, "Fingerprint({})", format_fingerprint(fp)),
            Self::InsecureAcceptAny => f.write_str("InsecureAcceptAny"),
        }
    }
}

impl FromStr for CaTrust {
    type Err = ScepError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self::Fingerprint(parse_fingerprint(s)?))
    }
}

impl CaTrust {
    /// Reduce `certs` to the ones that may be used for this enrollment.
    ///
    /// With a pinned fingerprint the result holds the pinned certificate and
    /// every certificate in the set whose signature chains to it; anything
    /// else the server sent is dropped. An empty set is not rejected here;
    /// there is nothing to encrypt to and the transport reports that on
    /// submission.
    pub fn check(&self, certs: &CaCertificates) -> Result<CaCertificates> {
        if certs.is_empty() {
            return Ok(CaCertificates::default());
        }

        match self {
            Self::Fingerprint(expected) => {
                let mut pinned = None;
                for (index, cert) in certs.iter().enumerate() {
                    if &compute_fingerprint(cert)? == expected {
                        pinned = Some(index);
                        break;
                    }
                }

                let Some(pinned) = pinned else {
                    let received = certs
                        .iter()
                        .map(|c| compute_fingerprint(c).map(|fp| format_fingerprint(&fp)))
                        .collect::<Result<Vec<_>>>()?;
                    return Err(ScepError::ca_not_trusted(format!(
                        "No certificate matches fingerprint {}; received {}",
                        format_fingerprint(expected),
                        received.join(", ")
                    )));
                };

                let all: Vec<&Certificate> = certs.iter().collect();
                tracing::info!(
                    "CA certificate '{}' matches pinned fingerprint",
                    subject_cn(all[pinned])
                );

                let mut trusted = vec![pinned];
                loop {
                    let issued = (0..all.len()).find(|&candidate| {
                        !trusted.contains(&candidate)
                            && trusted.iter().any(|&issuer| {
                                keygen::verify_certificate(all[candidate], all[issuer]).is_ok()
                            })
                    });
                    match issued {
                        Some(candidate) => trusted.push(candidate),
                        None => break,
                    }
                }

                for (index, cert) in all.iter().enumerate() {
                    if !trusted.contains(&index) {
                        tracing::warn!(
                            "Ignoring CA certificate '{}': not issued by the pinned certificate",
                            subject_cn(cert)
                        );
                    }
                }

                // Keep the server's order so recipient selection is unchanged.
                trusted.sort_unstable();
                Ok(CaCertificates::new(
                    trusted.into_iter().map(|index| all[index].clone()).collect(),
                ))
            }
            Self::InsecureAcceptAny => {
                for cert in certs {
                    tracing::warn!(
                        "Trusting CA certificate '{}' WITHOUT verification (SHA-256 {})",
                        subject_cn(cert),
                        format_fingerprint(&compute_fingerprint(cert)?)
                    );
                }
                Ok(certs.clone())
            }
        }
    }
}

fn subject_cn(cert: &Certificate) -> String {
    get_subject_cn(cert).unwrap_or_else(|| "unknown".to_string())
}

/// Compute the SHA-256 fingerprint of a certificate.
pub fn compute_fingerprint(cert: &Certificate) -> Result<[u8; 32]> {
    let der = cert
        .to_der()
        .map_err(|e| ScepError::certificate_parsing(format!("Failed to encode cert: {}", e)))?;

    Ok(Sha256::digest(&der).into())
}

/// Format a fingerprint as a colon-separated hex string.
///
/// Example output: "AB:CD:EF:01:23:45:..."
pub fn format_fingerprint(fp: &[u8; 32]) -> String {
    fp.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse a fingerprint from hex, with or without colon separators.
pub fn parse_fingerprint(s: &str) -> Result<[u8; 32]> {
    let hex: String = s.chars().filter(|c| *c != ':' && !c.is_whitespace()).collect();
    if hex.len() != 64 {
        return Err(ScepError::config("Fingerprint must be 32 bytes (SHA-256)"));
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ScepError::config("Invalid fingerprint format"));
    }

    let mut fp = [0u8; 32];
    for (i, byte) in fp.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| ScepError::config("Invalid fingerprint format"))?;
    }
    Ok(fp)
}

/// Get the common name from a certificate's subject.
pub fn get_subject_cn(cert: &Certificate) -> Option<String> {
    use const_oid::db::rfc4519::CN;

    for rdn in cert.tbs_certificate.subject.0.iter() {
        for atv in rdn.0.iter() {
            if atv.oid == CN
                && let Ok(s) = std::str::from_utf8(atv.value.value())
            {
                return Some(s.to_string());
            }
        }
    }
    None
}
