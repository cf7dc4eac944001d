// SPDX-License-Identifier: Apache-2.0
//! Subject CN + SAN dNSName extraction and normalization.

use bcder::{
    decode::{self, Constructed, Content},
    Tag,
};
use log::warn;
use std::collections::BTreeSet;
use x509_certificate::rfc5280::TbsCertificate;

const COMMON_NAME_OID: &[u8] = &[85, 4, 3]; // 2.5.4.3
const SUBJECT_ALT_NAME_OID: &[u8] = &[85, 29, 17]; // 2.5.29.17

/// Every DNS name asserted by `cert`: Subject CN attributes plus SAN
/// `dNSName` entries, lowercased, trailing dot stripped, empty and
/// NUL-containing values rejected, leading `*.` wildcards preserved.
#[must_use]
pub fn dns_names(cert: &TbsCertificate) -> BTreeSet<String> {
    let mut raw = Vec::new();

    for rdn in &**cert.subject {
        for attr in &**rdn {
            if attr.typ.as_ref() == COMMON_NAME_OID {
                // DirectoryString is a CHOICE of several universally-tagged
                // string types (PrintableString, UTF8String, ...), unlike
                // SAN's context-tagged GeneralName, so any primitive tag is
                // accepted here.
                if let Ok(value) = Constructed::decode(
                    (**attr.value).clone(),
                    bcder::Mode::Ber,
                    take_any_string,
                ) {
                    raw.push(value);
                }
            }
        }
    }

    if let Some(exts) = &cert.extensions {
        for ext in &**exts {
            if ext.id.as_ref() == SUBJECT_ALT_NAME_OID {
                let names = Constructed::decode(ext.value.to_bytes(), bcder::Mode::Ber, |cons| {
                    cons.take_sequence(|subcons| {
                        let mut names = Vec::new();
                        loop {
                            match take_tagged_string(subcons) {
                                Ok(name) => names.push(name),
                                Err(decode::Error::Malformed) => break,
                                Err(decode::Error::Unimplemented) => {}
                            }
                        }
                        Ok(names)
                    })
                });
                match names {
                    Ok(names) => raw.extend(names),
                    Err(_) => warn!("certificate has an invalid subjectAltName extension"),
                }
            }
        }
    }

    raw.into_iter().filter_map(normalize).collect()
}

/// Lowercase, strip one trailing dot, reject empty/NUL, keep wildcards.
fn normalize(name: String) -> Option<String> {
    let mut name = name.to_lowercase();
    if name.ends_with('.') {
        name.pop();
    }
    if name.is_empty() || name.contains('\0') {
        return None;
    }
    Some(name)
}

/// `dNSName` is context tag 2. Every other `GeneralName` alternative
/// (rfc822Name, URI, ...) is skipped; only DNS names are ever surfaced
/// as a `domain`/`san` value.
fn take_tagged_string(cons: &mut Constructed<bytes::Bytes>) -> Result<String, decode::Error> {
    cons.take_value(|tag, content| match content {
        Content::Primitive(prim) => {
            if tag == Tag::CTX_2 {
                let bytes = prim.take_all()?;
                Ok(ia5_or_utf8(bytes))
            } else {
                Err(decode::Error::Unimplemented)
            }
        }
        _ => Err(decode::Error::Malformed),
    })
}

fn take_any_string(cons: &mut Constructed<bytes::Bytes>) -> Result<String, decode::Error> {
    cons.take_value(|_tag, content| match content {
        Content::Primitive(prim) => Ok(ia5_or_utf8(prim.take_all()?)),
        _ => Err(decode::Error::Malformed),
    })
}

fn ia5_or_utf8(bytes: bytes::Bytes) -> String {
    let decoded = Constructed::decode(bytes.clone(), bcder::Mode::Ber, |cons| {
        if let Ok(s) = bcder::Ia5String::take_from(cons) {
            return Ok(s.to_string());
        }
        if let Ok(s) = bcder::Utf8String::take_from(cons) {
            return Ok(s.to_string());
        }
        Err(decode::Error::Malformed)
    });
    decoded.unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned())
}
