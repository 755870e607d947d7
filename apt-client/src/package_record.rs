// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Binary package entries of `Packages` indices.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html#debian-binary-package-control-files-debian-control>
for the fields of binary package paragraphs.
*/

use {
    crate::{
        control::ControlParagraph,
        error::{AptError, Result},
        io::{ChecksumType, ContentDigest},
    },
    serde::{Deserialize, Serialize},
    std::collections::BTreeMap,
};

/// A binary package available from a repository.
///
/// Well-known fields are typed. Any other field of the source paragraph is
/// preserved verbatim in [PackageRecord::extras].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageRecord {
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub maintainer: String,
    pub description: String,
    pub description_md5: String,
    pub section: String,
    pub priority: String,
    /// Path of the package file relative to the repository root.
    pub filename: String,
    pub size: u64,
    /// Hex SHA-256 of the package file.
    pub sha256: String,

    pub origin: Option<String>,
    pub bugs: Option<String>,
    pub md5sum: Option<String>,
    pub sha1: Option<String>,
    pub sha512: Option<String>,
    pub installed_size: Option<u64>,
    pub original_maintainer: Option<String>,
    pub homepage: Option<String>,
    pub depends: Option<String>,
    pub source: Option<String>,
    pub multi_arch: Option<String>,
    pub provides: Option<String>,
    pub suggests: Option<String>,
    pub recommends: Option<String>,
    pub conflicts: Option<String>,
    pub breaks: Option<String>,
    pub replaces: Option<String>,

    /// Fields not covered by a typed member, keyed by original field name.
    pub extras: BTreeMap<String, String>,

    /// The suite of the index this record came from.
    pub origin_suite: String,
    /// The component of the index this record came from.
    pub origin_component: String,
}

fn required(p: &ControlParagraph, name: &'static str) -> Result<String> {
    p.field_str(name)
        .map(|v| v.to_string())
        .ok_or(AptError::PackageRequiredFieldMissing(name))
}

fn optional(p: &ControlParagraph, name: &str) -> Option<String> {
    p.field_str(name).map(|v| v.to_string())
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| AptError::PackageFieldInvalid(name, value.to_string()))
}

impl PackageRecord {
    /// Names of fields mapped to typed members.
    pub const RECOGNIZED_FIELDS: [&'static str; 28] = [
        "Package",
        "Version",
        "Architecture",
        "Maintainer",
        "Description",
        "Description-md5",
        "Section",
        "Priority",
        "Filename",
        "Size",
        "SHA256",
        "Origin",
        "Bugs",
        "MD5sum",
        "SHA1",
        "SHA512",
        "Installed-Size",
        "Original-Maintainer",
        "Homepage",
        "Depends",
        "Source",
        "Multi-Arch",
        "Provides",
        "Suggests",
        "Recommends",
        "Conflicts",
        "Breaks",
        "Replaces",
    ];

    /// Whether a field name is mapped to a typed member.
    pub fn is_recognized_field(name: &str) -> bool {
        Self::RECOGNIZED_FIELDS
            .iter()
            .any(|f| f.eq_ignore_ascii_case(name))
    }

    /// Map a paragraph of a `Packages` index.
    ///
    /// `suite` and `component` identify the index the paragraph came from.
    pub fn from_paragraph(p: &ControlParagraph, suite: &str, component: &str) -> Result<Self> {
        let sha256_field = ChecksumType::Sha256.package_field_name();
        let sha256 = required(p, sha256_field)?;
        if ContentDigest::sha256_hex(&sha256).is_err() {
            return Err(AptError::PackageFieldInvalid(sha256_field, sha256));
        }

        let size = parse_u64("Size", &required(p, "Size")?)?;
        let installed_size = optional(p, "Installed-Size")
            .map(|v| parse_u64("Installed-Size", &v))
            .transpose()?;

        let extras = p
            .iter_fields()
            .filter(|f| !Self::is_recognized_field(f.name()))
            .map(|f| (f.name().to_string(), f.value_str().to_string()))
            .collect();

        Ok(Self {
            package: required(p, "Package")?,
            version: required(p, "Version")?,
            architecture: required(p, "Architecture")?,
            maintainer: required(p, "Maintainer")?,
            description: required(p, "Description")?,
            description_md5: required(p, "Description-md5")?,
            section: required(p, "Section")?,
            priority: required(p, "Priority")?,
            filename: required(p, "Filename")?,
            size,
            sha256,
            origin: optional(p, "Origin"),
            bugs: optional(p, "Bugs"),
            md5sum: optional(p, ChecksumType::Md5.package_field_name()),
            sha1: optional(p, ChecksumType::Sha1.package_field_name()),
            sha512: optional(p, ChecksumType::Sha512.package_field_name()),
            installed_size,
            original_maintainer: optional(p, "Original-Maintainer"),
            homepage: optional(p, "Homepage"),
            depends: optional(p, "Depends"),
            source: optional(p, "Source"),
            multi_arch: optional(p, "Multi-Arch"),
            provides: optional(p, "Provides"),
            suggests: optional(p, "Suggests"),
            recommends: optional(p, "Recommends"),
            conflicts: optional(p, "Conflicts"),
            breaks: optional(p, "Breaks"),
            replaces: optional(p, "Replaces"),
            extras,
            origin_suite: suite.to_string(),
            origin_component: component.to_string(),
        })
    }

    /// The declared digest of the package file of a given type, if any.
    pub fn digest(&self, checksum: ChecksumType) -> Option<Result<ContentDigest>> {
        let value = match checksum {
            ChecksumType::Md5 => self.md5sum.as_deref(),
            ChecksumType::Sha1 => self.sha1.as_deref(),
            ChecksumType::Sha256 => Some(self.sha256.as_str()),
            ChecksumType::Sha512 => self.sha512.as_deref(),
        };

        value.map(|v| ContentDigest::from_hex_digest(checksum, v))
    }

    /// The first line of the description.
    pub fn short_description(&self) -> &str {
        self.description.lines().next().unwrap_or_default()
    }
}
