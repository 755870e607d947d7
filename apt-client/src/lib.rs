// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Chain-of-trust client for Debian APT repositories.

This crate reads APT source declarations, fetches repository metadata and
downloads binary packages. Every piece of content it hands out is verified
through a chain rooted in the signature of the distribution's `InRelease` file.

# A Tour of Functionality

A common primitive of Debian repositories is *control files*. These consist of
*paragraphs* of key-value metadata. Control file primitives are defined in the
[control] module. [control::ControlParagraph] defines a paragraph, which consists
of [control::ControlField]. [control::ControlParagraphReader] implements a
streaming reader of control files and [control::ControlParagraphAsyncReader]
implements an asynchronous streaming reader.

The [sources] module parses `sources.list` style and deb822 `.sources` declarations.
[sources::SourceExtractor::extract()] turns them into
[repository::package_source::PackageSource] instances, one per component.
Sources of the same repository distribution share an [repository::AptRepository].

[repository::AptRepository] owns the chain of trust of a distribution. On first use
it fetches `InRelease`, has its signature checked by a [signing::SignatureVerifier]
and records the declared digests in a [repository::release::TrustedHashTable].
[repository::AptRepository::fetch_validated()] only returns content matching
those digests.

[repository::package_source::PackageSource::fetch_packages()] resolves the `Packages`
index of a component into [package_record::PackageRecord] values.
[repository::package_source::PackageSource::download_package()] downloads a package
file and only moves it into place when it matches the SHA-256 of its record.

Content is obtained through the [io::DataResolver] trait.
[repository::DefaultDataResolver] serves `http`, `https` and `file` URLs.

# Crate Features

The optional and enabled-by-default `http` feature enables fetching over HTTP
using the `reqwest` crate.
*/

pub mod config;
pub mod control;
pub mod error;
pub mod io;
pub mod package_record;
pub mod repository;
pub mod signing;
pub mod sources;
#[cfg(test)]
mod testutil;
