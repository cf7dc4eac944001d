// SPDX-License-Identifier: Apache-2.0
//! Public Suffix List classification (RFC: Mozilla Public Suffix List).
//!
//! The list is compiled into the `psl` crate at build time; there is no
//! runtime fetch and no initialization step, so `base_of` can be called
//! from any worker without synchronization.

/// Maps a DNS name to its registrable (eTLD+1) base domain, or `None` if
/// the Public Suffix List has no rule covering it.
///
/// Wildcard names (`*.example.co.uk`) are classified on the suffix after
/// the leading wildcard label.
#[must_use]
pub fn base_of(name: &str) -> Option<String> {
    let unwrapped = name.strip_prefix("*.").unwrap_or(name);
    if unwrapped.is_empty() {
        return None;
    }
    psl::domain_str(unwrapped).map(str::to_owned)
}
