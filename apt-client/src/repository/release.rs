// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `InRelease` file primitives.

`InRelease` files are the root of trust of a Debian repository distribution.
They are a control paragraph wrapped in a PGP cleartext signature. The paragraph
lists every *indices* file of the distribution along with its size and digests.

[TrustedHashTable] is built from the signed body of such a file once its
signature has been verified. It is the only source of expected digests for
content fetched from the distribution afterwards.
*/

use {
    crate::{
        control::{ControlFile, ControlParagraph},
        error::{AptError, Result},
        io::{ChecksumType, ContentDigest},
    },
    log::warn,
    pgp_cleartext::{CleartextSignatureReader, CleartextSignatures},
    std::{
        collections::BTreeMap,
        io::{Cursor, Read},
    },
};

const SIGNED_MESSAGE_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";

/// An entry for a file in a parsed `InRelease` file.
///
/// Instances correspond to a line in a `SHA256` (or other digest) field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseFileEntry {
    /// The path to this file relative to `dists/<suite>/`.
    pub path: String,

    /// The content digest of this file.
    pub digest: ContentDigest,

    /// The size of the file in bytes.
    pub size: u64,
}

impl ReleaseFileEntry {
    /// Parse a `<digest> <size> <path>` line.
    fn from_line(checksum: ChecksumType, line: &str) -> Result<Self> {
        let words = line.split_ascii_whitespace().collect::<Vec<_>>();

        if let [digest, size, path] = words.as_slice() {
            Ok(Self {
                path: path.to_string(),
                digest: ContentDigest::from_hex_digest(checksum, digest)?,
                size: size.parse::<u64>()?,
            })
        } else {
            Err(AptError::ReleaseMalformed(format!(
                "expected 3 words in digest line; got {}",
                words.len()
            )))
        }
    }
}

/// The digests of a distribution's files, as declared by its signed `InRelease`.
///
/// Lookups are by path relative to `dists/<suite>/` and are exact.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrustedHashTable {
    entries: BTreeMap<String, ReleaseFileEntry>,
}

impl TrustedHashTable {
    /// Build an instance from the digest field of a release paragraph.
    ///
    /// Lines that cannot be parsed are skipped.
    pub fn from_paragraph(paragraph: &ControlParagraph, checksum: ChecksumType) -> Self {
        let mut entries = BTreeMap::new();

        if let Some(lines) = paragraph.field_iter_value_lines(checksum.field_name()) {
            for line in lines.filter(|l| !l.is_empty()) {
                match ReleaseFileEntry::from_line(checksum, line) {
                    Ok(entry) => {
                        entries.insert(entry.path.clone(), entry);
                    }
                    Err(e) => {
                        warn!(
                            "ignoring malformed {} line {:?}: {}",
                            checksum.field_name(),
                            line,
                            e
                        );
                    }
                }
            }
        }

        Self { entries }
    }

    /// Parse the content of an `InRelease` file.
    ///
    /// Only the signed body of a cleartext signed document is considered.
    /// Documents without cleartext framing are parsed as is. The first
    /// paragraph declaring a `SHA256` field provides the entries.
    pub fn parse_inrelease(text: &str) -> Result<Self> {
        let control = if is_cleartext_signed(text) {
            let (body, _) = read_cleartext_signed(text.as_bytes())?;
            ControlFile::parse_str(&body)?
        } else {
            ControlFile::parse_str(text)?
        };

        let checksum = ChecksumType::Sha256;

        let paragraph = control
            .paragraphs()
            .find(|p| p.has_field(checksum.field_name()));

        let table = match paragraph {
            Some(paragraph) => Self::from_paragraph(paragraph, checksum),
            None => {
                warn!("release file has no {} field", checksum.field_name());
                Self::default()
            }
        };

        Ok(table)
    }

    /// Look up the entry for a path relative to `dists/<suite>/`.
    pub fn get(&self, path: &str) -> Option<&ReleaseFileEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries, in path order.
    pub fn iter(&self) -> impl Iterator<Item = &ReleaseFileEntry> {
        self.entries.values()
    }
}

/// Whether a document starts with PGP cleartext signature framing.
pub fn is_cleartext_signed(text: &str) -> bool {
    text.starts_with(SIGNED_MESSAGE_HEADER)
}

/// Parse a PGP cleartext signed document.
///
/// Returns the signed body, with dash escaping removed, and the parsed
/// signatures. Signatures are not verified. Documents lacking a signature
/// block are rejected.
pub fn read_cleartext_signed(data: &[u8]) -> Result<(String, CleartextSignatures)> {
    let mut reader = CleartextSignatureReader::new(Cursor::new(data));

    let mut body = String::new();
    reader
        .read_to_string(&mut body)
        .map_err(|e| {
            AptError::ReleaseMalformed(format!("bad cleartext signature framing: {}", e))
        })?;

    let signatures = reader.finalize();

    if signatures.iter_signatures().next().is_none() {
        return Err(AptError::ReleaseMalformed(
            "cleartext signed message lacks a signature block".to_string(),
        ));
    }

    Ok((body, signatures))
}
