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

//! RSA key generation.
//!
//! Key material is produced through an explicit [`CryptoContext`] that is
//! built once per process and handed to everything that needs randomness or
//! key-size policy. There is no process-wide provider registration.

use der::{Decode, Encode};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use spki::SubjectPublicKeyInfoOwned;
use x509_cert::Certificate;

use crate::error::{Result, ScepError};
use crate::types::DigestAlgorithm;

/// RSA modulus sizes accepted by [`CryptoContext::generate`].
pub const SUPPORTED_KEY_SIZES: &[usize] = &[1024, 2048, 3072, 4096];

/// Default RSA modulus size.
pub const DEFAULT_KEY_SIZE: usize = 2048;

/// Cryptographic context shared by key generation and certificate building.
///
/// The context owns the key-size policy and hands out the operating system
/// CSPRNG.
#[derive(Debug, Clone)]
pub struct CryptoContext {
    allowed_key_sizes: Vec<usize>,
}

impl Default for CryptoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoContext {
    /// Create a context accepting [`SUPPORTED_KEY_SIZES`].
    pub fn new() -> Self {
        Self {
            allowed_key_sizes: SUPPORTED_KEY_SIZES.to_vec(),
        }
    }

    /// Restrict the accepted key sizes.
    pub fn with_key_sizes(mut self, sizes: &[usize]) -> Self {
        self.allowed_key_sizes = sizes.to_vec();
        self
    }

    /// Key sizes this context will generate.
    pub fn allowed_key_sizes(&self) -> &[usize] {
        &self.allowed_key_sizes
    }

    /// Cryptographically secure random source.
    pub fn rng(&self) -> OsRng {
        OsRng
    }

    /// Generate a new RSA key pair of `bits` modulus length.
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::KeyGeneration`] if `bits` is not one of the
    /// allowed sizes or if the provider fails.
    pub fn generate(&self, bits: usize) -> Result<KeyPair> {
        if !self.allowed_key_sizes.contains(&bits) {
            return Err(ScepError::key_generation(format!(
                "Unsupported RSA key size {} (supported: {:?})",
                bits, self.allowed_key_sizes
            )));
        }

        if bits < DEFAULT_KEY_SIZE {
            tracing::warn!("Generating a {}-bit RSA key; 2048 bits or more is recommended", bits);
        }

        tracing::debug!("Generating {}-bit RSA key", bits);
        let private_key = RsaPrivateKey::new(&mut self.rng(), bits)
            .map_err(|e| ScepError::key_generation(format!("Failed to generate key pair: {}", e)))?;

        Ok(KeyPair::from_private_key(private_key))
    }
}

/// An RSA key pair owned by a single enrollment run.
///
/// `Debug` output never includes private key material.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    private_key: RsaPrivateKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &"RSA")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Wrap an existing RSA private key.
    pub fn from_private_key(private_key: RsaPrivateKey) -> Self {
        Self { private_key }
    }

    /// Decode a PKCS#1 DER-encoded RSA private key.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_der(der)
            .map_err(|e| ScepError::key_generation(format!("Invalid RSA private key: {}", e)))?;
        Ok(Self { private_key })
    }

    /// Encode the private key as PKCS#1 DER.
    pub fn to_pkcs1_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .private_key
            .to_pkcs1_der()
            .map_err(|e| ScepError::key_generation(format!("Failed to encode private key: {}", e)))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// The private half.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// The public half.
    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    /// Modulus length in bits.
    pub fn bits(&self) -> usize {
        self.private_key.n().bits()
    }

    /// DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .public_key()
            .to_public_key_der()
            .map_err(|e| ScepError::key_generation(format!("Failed to encode public key: {}", e)))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// SubjectPublicKeyInfo for embedding in certificates and requests.
    pub fn subject_public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let der = self.public_key_der()?;
        Ok(SubjectPublicKeyInfoOwned::from_der(&der)?)
    }

    /// RSA PKCS#1 v1.5 signature over `data` hashed with `digest`.
    pub fn sign(&self, digest: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        let hashed = digest.digest(data);
        self.private_key
            .sign(pkcs1v15_scheme(digest), &hashed)
            .map_err(|e| ScepError::signature(format!("Signing failed: {}", e)))
    }

    /// Decrypt an RSA PKCS#1 v1.5 key-transport ciphertext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.private_key
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| ScepError::message(format!("Key transport decryption failed: {}", e)))
    }
}

/// Verify an RSA PKCS#1 v1.5 signature made with `digest`.
pub fn verify_signature(
    public_key: &RsaPublicKey,
    digest: DigestAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<()> {
    let hashed = digest.digest(data);
    public_key
        .verify(pkcs1v15_scheme(digest), &hashed, signature)
        .map_err(|e| ScepError::signature(e.to_string()))
}

/// RSA public key of `cert`.
pub fn certificate_public_key(cert: &Certificate) -> Result<RsaPublicKey> {
    let spki_der = cert.tbs_certificate.subject_public_key_info.to_der()?;
    RsaPublicKey::from_public_key_der(&spki_der)
        .map_err(|e| ScepError::certificate_parsing(format!("Certificate key is not RSA: {}", e)))
}

/// Verify that `cert` carries a valid signature by `issuer`'s key.
pub fn verify_certificate(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    if cert.tbs_certificate.issuer != issuer.tbs_certificate.subject {
        return Err(ScepError::signature("Issuer name does not match"));
    }

    let oid = &cert.signature_algorithm.oid;
    let digest = DigestAlgorithm::from_signature_oid(oid)
        .ok_or_else(|| ScepError::signature(format!("Unsupported certificate signature {}", oid)))?;
    let signature = cert
        .signature
        .as_bytes()
        .ok_or_else(|| ScepError::signature("Certificate signature has unused bits"))?;

    verify_signature(
        &certificate_public_key(issuer)?,
        digest,
        &cert.tbs_certificate.to_der()?,
        signature,
    )
}

/// Encrypt `data` to `public_key` with RSA PKCS#1 v1.5.
pub fn encrypt_to(public_key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>> {
    public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, data)
        .map_err(|e| ScepError::message(format!("Key transport encryption failed: {}", e)))
}

fn pkcs1v15_scheme(digest: DigestAlgorithm) -> Pkcs1v15Sign {
    match digest {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
    }
}
