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

//! PEM encoding of enrollment artifacts.
//!
//! Artifacts are appended to output files, never truncated, so reusing a
//! path across runs accumulates several armored blocks in one file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use der::pem::LineEnding;
use der::{Decode, Encode};
use rustls_pemfile::Item;
use x509_cert::Certificate;
use x509_cert::crl::CertificateList;
use x509_cert::request::CertReq;

use crate::error::{Result, ScepError};
use crate::keygen::KeyPair;

/// PEM label for PKCS#1 RSA private keys.
pub const LABEL_RSA_PRIVATE_KEY: &str = "RSA PRIVATE KEY";

/// PEM label for X.509 certificates.
pub const LABEL_CERTIFICATE: &str = "CERTIFICATE";

/// PEM label for PKCS#10 requests.
pub const LABEL_CERTIFICATE_REQUEST: &str = "CERTIFICATE REQUEST";

/// PEM label for CRLs.
pub const LABEL_X509_CRL: &str = "X509 CRL";

/// An artifact that can be written as PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PemArtifact {
    /// RSA private key (PKCS#1).
    PrivateKey(KeyPair),
    /// X.509 certificate.
    Certificate(Certificate),
    /// PKCS#10 certificate request.
    Request(CertReq),
    /// Certificate revocation list.
    Crl(CertificateList),
}

impl PemArtifact {
    /// PEM type label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PrivateKey(_) => LABEL_RSA_PRIVATE_KEY,
            Self::Certificate(_) => LABEL_CERTIFICATE,
            Self::Request(_) => LABEL_CERTIFICATE_REQUEST,
            Self::Crl(_) => LABEL_X509_CRL,
        }
    }

    /// DER encoding of the artifact.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        match self {
            Self::PrivateKey(key) => key.to_pkcs1_der(),
            Self::Certificate(cert) => Ok(cert.to_der()?),
            Self::Request(req) => Ok(req.to_der()?),
            Self::Crl(crl) => Ok(crl.to_der()?),
        }
    }

    fn from_der(label: &str, der: &[u8]) -> Result<Self> {
        match label {
            LABEL_RSA_PRIVATE_KEY => Ok(Self::PrivateKey(KeyPair::from_pkcs1_der(der)?)),
            LABEL_CERTIFICATE => Ok(Self::Certificate(Certificate::from_der(der)?)),
            LABEL_CERTIFICATE_REQUEST => Ok(Self::Request(CertReq::from_der(der)?)),
            LABEL_X509_CRL => Ok(Self::Crl(CertificateList::from_der(der)?)),
            other => Err(ScepError::invalid_pem(format!("Unsupported PEM label '{}'", other))),
        }
    }
}

/// Encode an artifact as a PEM block.
pub fn encode(artifact: &PemArtifact) -> Result<String> {
    let der = artifact.to_der()?;
    der::pem::encode_string(artifact.label(), LineEnding::LF, &der)
        .map_err(|e| ScepError::invalid_pem(e.to_string()))
}

/// Decode a single PEM block.
pub fn decode(text: &str) -> Result<PemArtifact> {
    let (label, der) = der::pem::decode_vec(text.trim().as_bytes())
        .map_err(|e| ScepError::invalid_pem(e.to_string()))?;
    PemArtifact::from_der(label, &der)
}

/// Decode every supported PEM block in `text`, in order.
///
/// Text outside the armored blocks and blocks of other types are skipped.
pub fn decode_all(text: &str) -> Result<Vec<PemArtifact>> {
    let mut reader = std::io::BufReader::new(text.as_bytes());
    let mut artifacts = Vec::new();

    loop {
        let artifact = match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::Pkcs1Key(key))) => {
                PemArtifact::from_der(LABEL_RSA_PRIVATE_KEY, key.secret_pkcs1_der())?
            }
            Ok(Some(Item::X509Certificate(cert))) => {
                PemArtifact::from_der(LABEL_CERTIFICATE, cert.as_ref())?
            }
            Ok(Some(Item::Csr(csr))) => PemArtifact::from_der(LABEL_CERTIFICATE_REQUEST, csr.as_ref())?,
            Ok(Some(Item::Crl(crl))) => PemArtifact::from_der(LABEL_X509_CRL, crl.as_ref())?,
            Ok(Some(_)) => {
                tracing::debug!("Skipping unsupported PEM block");
                continue;
            }
            Ok(None) => break,
            Err(e) => {
                return Err(ScepError::invalid_pem(format!("Failed to parse PEM: {}", e)));
            }
        };
        artifacts.push(artifact);
    }

    Ok(artifacts)
}

/// Append an artifact to `path`, creating the file if needed.
///
/// Private keys are created with owner-only permissions on Unix.
pub fn write_to_file(path: impl AsRef<Path>, artifact: &PemArtifact) -> Result<()> {
    let path = path.as_ref();
    let pem = encode(artifact)?;

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    if matches!(artifact, PemArtifact::PrivateKey(_)) {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(pem.as_bytes())?;
    file.flush()?;

    tracing::debug!("Appended {} to {}", artifact.label(), path.display());
    Ok(())
}

/// Print `title`, the PEM block and a blank line to `writer`.
pub fn write_to_stream<W: Write + ?Sized>(
    writer: &mut W,
    title: &str,
    artifact: &PemArtifact,
) -> Result<()> {
    let pem = encode(artifact)?;
    writeln!(writer, "{}:", title)?;
    write!(writer, "{}", pem)?;
    writeln!(writer)?;
    Ok(())
}
