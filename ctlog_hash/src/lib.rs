// SPDX-License-Identifier: Apache-2.0
use ring::digest;
use std::fmt;

/// SHA-256 fingerprint of a certificate's exact DER bytes.
///
/// `Display` renders lowercase hex, matching the `fingerprint` column
/// every `DomainRow` shares across the names of one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    #[must_use]
    pub fn of_der(cert_der: &[u8]) -> Self {
        let digest = digest::digest(&digest::SHA256, cert_der);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(digest.as_ref());
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
