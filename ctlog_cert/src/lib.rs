// SPDX-License-Identifier: Apache-2.0
//! Decode an RFC 6962 leaf blob into a certificate's DNS names and
//! metadata.

pub mod leaf;
mod names;
mod rfc4514;

use std::collections::BTreeSet;

use ctlog_hash::Fingerprint;
use x509_certificate::asn1time::Time;

pub use leaf::Skip;
pub use names::dns_names;

/// One decoded, non-precert certificate and the names asserted by it.
/// Transient: produced per leaf, consumed into `DomainRow`s, then
/// dropped.
#[derive(Debug, Clone)]
pub struct LeafRecord {
    pub fingerprint: Fingerprint,
    pub issuer_rfc4514: String,
    pub subject_rfc4514: String,
    pub not_before: i64,
    pub not_after: i64,
    pub names: BTreeSet<String>,
}

/// Parse a base64-decoded `leaf_input` blob all the way to a
/// [`LeafRecord`], or report why nothing was produced.
///
/// Certificates with neither a CN nor a SAN `dNSName` are dropped as
/// [`Skip::NoNames`] — a policy decision, not an error.
pub fn parse_leaf(leaf_input: &[u8]) -> Result<LeafRecord, Skip> {
    let entry = leaf::parse_x509_entry(leaf_input)?;

    let cert: x509_certificate::rfc5280::Certificate =
        match x509_certificate::X509Certificate::from_der(entry.cert_der.as_slice()) {
            Ok(cert) => cert.into(),
            Err(_) => return Err(Skip::InvalidDer),
        };
    let tbs = &cert.tbs_certificate;

    let names = dns_names(tbs);
    if names.is_empty() {
        return Err(Skip::NoNames);
    }

    let not_before = time_to_unix(tbs.validity.not_before.clone());
    let not_after = time_to_unix(tbs.validity.not_after.clone());

    Ok(LeafRecord {
        fingerprint: Fingerprint::of_der(&entry.cert_der),
        issuer_rfc4514: rfc4514::render(&tbs.issuer),
        subject_rfc4514: rfc4514::render(&tbs.subject),
        not_before,
        not_after,
        names,
    })
}

fn time_to_unix(time: Time) -> i64 {
    match time {
        Time::UtcTime(time) => *time,
        Time::GeneralTime(time) => time.into(),
    }
    .timestamp()
}
