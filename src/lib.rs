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

//! # usg-scep-client
//!
//! A Rust implementation of an RFC 8894 SCEP (Simple Certificate Enrollment
//! Protocol) client.
//!
//! The library generates an RSA key pair, builds a self-signed bootstrap
//! certificate and a PKCS#10 request, submits the request to a SCEP CA over
//! HTTP, polls while the CA reports PENDING and writes every artifact as PEM.
//!
//! ## Features
//!
//! - **Async-first design** using Tokio
//! - **SCEP operations**: GetCACaps, GetCACert, PKCSReq, GetCertInitial, GetCRL
//! - **Capability negotiation**: POST/GET, SHA-256/SHA-1, AES/3DES
//! - **Pinned CA trust** by SHA-256 fingerprint, with an explicit insecure mode
//! - **Cancellable polling** with an optional attempt limit
//!
//! ## Quick Start
//!
//! ```no_run
//! use usg_scep_client::{
//!     CaTrust, CryptoContext, Enrollment, EnrollmentRequest, EnrollmentResult, ScepClient,
//!     ScepClientConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScepClientConfig::builder()
//!         .server_url("http://ca.example.com/scep/pkiclient.exe")?
//!         .build()?;
//!     let client = ScepClient::new(config)?;
//!
//!     let request = EnrollmentRequest::new("CN=device01,O=Example".parse()?);
//!     let trust: CaTrust = "AB:CD:...".parse()?;
//!
//!     let mut enrollment = Enrollment::new(&client, CryptoContext::new(), trust, request);
//!     match enrollment.run().await? {
//!         EnrollmentResult::Issued(issued) => {
//!             println!("Issued after {} poll(s)", issued.polls);
//!         }
//!         EnrollmentResult::Rejected { fail_info, .. } => {
//!             eprintln!("Rejected: {}", fail_info);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod csr;
pub mod enroll;
pub mod error;
pub mod keygen;
pub mod message;
pub mod pem;
pub mod trust;
pub mod types;


// Re-export main types at crate root for convenience
pub use client::{RequestSigner, ScepClient, ScepTransport};
pub use config::{EnrollmentConfig, ScepClientConfig, ScepClientConfigBuilder};
pub use csr::DistinguishedName;
pub use enroll::{Enrollment, EnrollmentRequest, EnrollmentResult, EnrollmentState, IssuedCertificate};
pub use error::{Result, ScepError};
pub use keygen::{CryptoContext, KeyPair};
pub use pem::PemArtifact;
pub use trust::CaTrust;
pub use types::{CaCapabilities, CaCertificates, EnrollmentOutcome, FailInfo, TransactionId};

// Re-export x509_cert::Certificate for convenience
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("usg-scep-client/", env!("CARGO_PKG_VERSION"));
