// SPDX-License-Identifier: Apache-2.0
//! RFC 4514-style rendering of a certificate's Subject/Issuer `Name`
//! for the `issuer`/`subject` display columns.

use x509_certificate::rfc5280::Name;

/// Render a Subject or Issuer `Name` as a comma-joined `key=value`
/// string, delegating to `x509_certificate`'s own `Name` formatting.
#[must_use]
pub fn render(name: &Name) -> String {
    name.to_string()
}
