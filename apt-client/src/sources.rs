// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! APT source declarations.

Two dialects are understood:

* The one-line style of `sources.list`:
  `deb [signed-by=/path/key.gpg] https://deb.debian.org/debian bookworm main contrib`
* The deb822 style of `*.sources` files, with `Types`, `URIs`, `Suites`,
  `Components` and optionally `Signed-By` fields. `Signed-By` may name a
  keyring file or embed an armored public key.

See `sources.list(5)`.

Declarations that cannot be used are skipped with a warning. Extraction never
fails as a whole.
*/

use {
    crate::{
        config::ClientConfig,
        control::{ControlField, ControlFile, ControlParagraph},
        error::Result,
        io::DataResolver,
        repository::{
            normalize_base_url, package_source::PackageSource, AptRepository,
            DefaultDataResolver,
        },
        signing::{verifier_from_config, GpgDearmorer, KeyDearmorer, SignatureVerifier},
    },
    log::{debug, warn},
    once_cell::sync::Lazy,
    regex::Regex,
    std::{borrow::Cow, collections::HashMap, io::Write, sync::Arc},
};

/// Matches a `Types` field at the start of a line.
static TYPES_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?mi)^types[ \t]*:").unwrap());

const PUBLIC_KEY_HEADER: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";

/// The format of a source declaration document.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SourcesDialect {
    /// One-line `deb ...` entries.
    OneLine,
    /// deb822 paragraphs.
    Deb822,
}

impl SourcesDialect {
    /// Determine the dialect of a document.
    pub fn detect(text: &str) -> Self {
        if TYPES_FIELD.is_match(text) {
            Self::Deb822
        } else {
            Self::OneLine
        }
    }
}

/// A repository declared by a one-line entry.
#[derive(Clone, Debug, Eq, PartialEq)]
struct OneLineEntry<'a> {
    uri: &'a str,
    suite: &'a str,
    components: Vec<&'a str>,
    signed_by: Option<&'a str>,
}

impl<'a> OneLineEntry<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();

        let rest = match line.split_once(|c: char| c.is_ascii_whitespace()) {
            Some(("deb", rest)) => rest.trim_start(),
            _ => {
                debug!("ignoring non-binary source line: {}", line);
                return None;
            }
        };

        let mut signed_by = None;

        let rest = if let Some(options) = rest.strip_prefix('[') {
            let (options, rest) = match options.split_once(']') {
                Some(v) => v,
                None => {
                    warn!("ignoring source line with unterminated options: {}", line);
                    return None;
                }
            };

            for option in options.split_ascii_whitespace() {
                if let Some((key, value)) = option.split_once('=') {
                    if key.eq_ignore_ascii_case("signed-by") {
                        signed_by = Some(value);
                    }
                }
            }

            rest
        } else {
            rest
        };

        let words = rest.split_ascii_whitespace().collect::<Vec<_>>();

        if let [uri, suite, components @ ..] = words.as_slice() {
            if !components.is_empty() {
                return Some(Self {
                    uri: *uri,
                    suite: *suite,
                    components: components.to_vec(),
                    signed_by,
                });
            }
        }

        warn!("ignoring incomplete source line: {}", line);
        None
    }
}

/// Removes `#` comment lines.
fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|l| !l.starts_with('#'))
        .map(|l| format!("{}\n", l))
        .collect()
}

fn words<'a>(p: &'a ControlParagraph, name: &str) -> Option<Vec<&'a str>> {
    p.field_iter_value_words(name)
        .map(|w| w.collect::<Vec<_>>())
        .filter(|w| !w.is_empty())
}

/// Turns source declarations into [PackageSource] instances.
///
/// Instances hold the capabilities given to every [AptRepository] they create.
#[derive(Clone)]
pub struct SourceExtractor {
    resolver: Arc<dyn DataResolver>,
    verifier: Arc<dyn SignatureVerifier>,
    dearmorer: Arc<dyn KeyDearmorer>,
}

impl SourceExtractor {
    /// Construct an instance fetching over HTTP or the filesystem.
    ///
    /// Signatures are checked by the configured backend. Armored keys are
    /// dearmored with `gpg`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::with_capabilities(
            Arc::new(DefaultDataResolver::new(config)?),
            verifier_from_config(config),
            Arc::new(GpgDearmorer::from_config(config)),
        ))
    }

    pub fn with_capabilities(
        resolver: Arc<dyn DataResolver>,
        verifier: Arc<dyn SignatureVerifier>,
        dearmorer: Arc<dyn KeyDearmorer>,
    ) -> Self {
        Self {
            resolver,
            verifier,
            dearmorer,
        }
    }

    /// Extract package sources for an architecture from a document.
    ///
    /// Declarations naming the same URI, suite and `Signed-By` value share a
    /// single [AptRepository].
    pub async fn extract(&self, text: &str, architecture: &str) -> Vec<PackageSource> {
        let mut state = Extraction {
            extractor: self,
            architecture,
            repositories: HashMap::new(),
            sources: vec![],
        };

        match SourcesDialect::detect(text) {
            SourcesDialect::Deb822 => state.extract_deb822(text).await,
            SourcesDialect::OneLine => state.extract_one_line(text).await,
        }

        state.sources
    }

    /// Resolve a `Signed-By` value to a keyring reference.
    ///
    /// A single line that is not key material is a keyring path. Embedded
    /// armored keys are written to a temporary file that lives for the rest of
    /// the process and converted to a binary keyring when possible. If that
    /// conversion fails, the armored file is used.
    pub async fn resolve_signed_by(&self, value: &str) -> Option<String> {
        let value = value.trim();

        if value.is_empty() {
            return None;
        }

        if !value.contains('\n') && !value.contains(PUBLIC_KEY_HEADER) {
            return Some(value.to_string());
        }

        let field = ControlField::new(Cow::Borrowed("Signed-By"), Cow::Borrowed(value));
        let mut armored = field.iter_lines().collect::<Vec<_>>().join("\n");
        armored.push('\n');

        let path = match Self::persist_key(&armored) {
            Ok(path) => path,
            Err(e) => {
                warn!("unable to write embedded signing key: {}", e);
                return Some(armored);
            }
        };

        match self.dearmorer.dearmor(&path).await {
            Ok(keyring) => {
                debug!("dearmored embedded signing key to {}", keyring.display());
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!("unable to remove {}: {}", path.display(), e);
                }

                Some(keyring.display().to_string())
            }
            Err(e) => {
                warn!(
                    "unable to dearmor embedded signing key ({}); using armored key {}",
                    e,
                    path.display()
                );

                Some(path.display().to_string())
            }
        }
    }

    fn persist_key(armored: &str) -> Result<std::path::PathBuf> {
        let mut f = tempfile::Builder::new()
            .prefix("apt-client-key-")
            .suffix(".asc")
            .tempfile()?;
        f.write_all(armored.as_bytes())?;
        f.flush()?;

        let (_, path) = f.keep().map_err(|e| e.error)?;

        Ok(path)
    }
}

/// State of a single [SourceExtractor::extract()] call.
struct Extraction<'a> {
    extractor: &'a SourceExtractor,
    architecture: &'a str,
    repositories: HashMap<(String, String, Option<String>), Arc<AptRepository>>,
    sources: Vec<PackageSource>,
}

impl<'a> Extraction<'a> {
    async fn repository(
        &mut self,
        uri: &str,
        suite: &str,
        signed_by: Option<&str>,
    ) -> Option<Arc<AptRepository>> {
        let base_url = match normalize_base_url(uri) {
            Ok(url) => url,
            Err(e) => {
                warn!("ignoring source with invalid URI {}: {}", uri, e);
                return None;
            }
        };

        let key = (
            base_url.to_string(),
            suite.to_string(),
            signed_by.map(|s| s.to_string()),
        );

        if let Some(repo) = self.repositories.get(&key) {
            return Some(repo.clone());
        }

        let keyring = match signed_by {
            Some(value) => self.extractor.resolve_signed_by(value).await,
            None => None,
        };

        let repo = Arc::new(AptRepository::new(
            base_url,
            suite,
            keyring,
            self.extractor.resolver.clone(),
            self.extractor.verifier.clone(),
        ));
        self.repositories.insert(key, repo.clone());

        Some(repo)
    }

    fn add_sources(&mut self, repo: &Arc<AptRepository>, components: &[&str]) {
        for component in components {
            self.sources
                .push(PackageSource::new(repo.clone(), component, self.architecture));
        }
    }

    async fn extract_one_line(&mut self, text: &str) {
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(entry) = OneLineEntry::parse(trimmed) {
                if let Some(repo) = self.repository(entry.uri, entry.suite, entry.signed_by).await {
                    self.add_sources(&repo, &entry.components);
                }
            }
        }
    }

    async fn extract_deb822(&mut self, text: &str) {
        let control = match ControlFile::parse_str(&strip_comments(text)) {
            Ok(control) => control,
            Err(e) => {
                warn!("unable to parse sources: {}", e);
                return;
            }
        };

        for paragraph in control.paragraphs() {
            if paragraph
                .field_str("Enabled")
                .map_or(false, |v| v.eq_ignore_ascii_case("no"))
            {
                debug!("skipping disabled source stanza");
                continue;
            }

            let is_binary = paragraph
                .field_iter_value_words("Types")
                .map(|mut types| types.any(|t| t == "deb"))
                .unwrap_or(false);
            if !is_binary {
                debug!("skipping stanza without deb type");
                continue;
            }

            let (uris, suites, components) = match (
                words(paragraph, "URIs"),
                words(paragraph, "Suites"),
                words(paragraph, "Components"),
            ) {
                (Some(uris), Some(suites), Some(components)) => (uris, suites, components),
                _ => {
                    warn!("ignoring source stanza lacking URIs, Suites or Components");
                    continue;
                }
            };

            let signed_by = paragraph.field_str("Signed-By");

            for uri in &uris {
                for suite in &suites {
                    if let Some(repo) = self.repository(uri, suite, signed_by).await {
                        self.add_sources(&repo, &components);
                    }
                }
            }
        }
    }
}
