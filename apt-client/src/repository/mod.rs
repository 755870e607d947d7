// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repository primitives.

A Debian repository is a collection of files holding packages and other
support primitives. See <https://wiki.debian.org/DebianRepository/Format>
for the canonical definition of a Debian repository.

[AptRepository] represents a single distribution (a *suite*) of a repository.
It fetches and verifies the distribution's `InRelease` file on first use and
afterwards only hands out metadata whose digest matches what `InRelease`
declares.
*/

use {
    crate::{
        config::ClientConfig,
        error::{AptError, Result},
        io::{DataResolver, FetchEvent, FetchedContent, ProgressCallback},
        repository::{
            filesystem::FilesystemDataResolver,
            release::{is_cleartext_signed, TrustedHashTable},
        },
        signing::{verify_inline_signature, SignatureVerifier},
    },
    async_trait::async_trait,
    futures::{AsyncBufRead, AsyncReadExt},
    log::{debug, info, warn},
    std::{pin::Pin, sync::Arc},
    tokio::sync::OnceCell,
    url::Url,
};

pub mod filesystem;
#[cfg(feature = "http")]
pub mod http;
pub mod package_source;
pub mod release;

/// A [DataResolver] dispatching on URL scheme.
///
/// `file` URLs are served from the local filesystem. `http` and `https` URLs
/// are fetched over the network when the `http` feature is enabled.
#[derive(Clone, Debug)]
pub struct DefaultDataResolver {
    #[cfg(feature = "http")]
    http: http::HttpDataResolver,
    filesystem: FilesystemDataResolver,
}

impl DefaultDataResolver {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        #[cfg(not(feature = "http"))]
        let _ = config;

        Ok(Self {
            #[cfg(feature = "http")]
            http: http::HttpDataResolver::new(config)?,
            filesystem: FilesystemDataResolver,
        })
    }
}

#[async_trait]
impl DataResolver for DefaultDataResolver {
    async fn fetch(&self, url: &Url) -> Result<FetchedContent> {
        match url.scheme() {
            #[cfg(feature = "http")]
            "http" | "https" => self.http.fetch(url).await,
            "file" => self.filesystem.fetch(url).await,
            _ => Err(AptError::UnsupportedUrlScheme(url.to_string())),
        }
    }
}

/// Parse a repository base URL, normalizing it to end with a `/`.
pub fn normalize_base_url(s: &str) -> Result<Url> {
    let mut url = Url::parse(s)?;

    // Trailing URLs are significant to the Url type when we .join(). So ensure
    // the URL has a trailing path.
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }

    Ok(url)
}

/// A distribution of a Debian repository and its chain of trust.
///
/// Instances are identified by base URL, suite and signing key. They are meant
/// to be shared (via [Arc]) by every [package_source::PackageSource] of the
/// distribution so `InRelease` is fetched and verified only once.
pub struct AptRepository {
    base_url: Url,
    suite: String,
    signed_by: Option<String>,
    resolver: Arc<dyn DataResolver>,
    verifier: Arc<dyn SignatureVerifier>,
    trusted: OnceCell<TrustedHashTable>,
}

impl std::fmt::Debug for AptRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AptRepository")
            .field("base_url", &self.base_url.as_str())
            .field("suite", &self.suite)
            .field("signed_by", &self.signed_by)
            .field("verified", &self.is_verified())
            .finish()
    }
}

impl AptRepository {
    /// Construct an instance.
    ///
    /// `signed_by` is the keyring used to verify `InRelease`. [None] (or a blank
    /// value) declares the repository as explicitly unverified.
    pub fn new(
        base_url: Url,
        suite: impl ToString,
        signed_by: Option<String>,
        resolver: Arc<dyn DataResolver>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        Self {
            base_url,
            suite: suite.to_string(),
            signed_by: signed_by.filter(|s| !s.trim().is_empty()),
            resolver,
            verifier,
            trusted: OnceCell::new(),
        }
    }

    /// The base URL of the repository. Always ends with `/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    /// The keyring reference used to verify `InRelease`.
    pub fn signed_by(&self) -> Option<&str> {
        self.signed_by.as_deref()
    }

    /// Whether `InRelease` is required to carry a good signature.
    pub fn is_signed(&self) -> bool {
        self.signed_by.is_some()
    }

    /// Whether `InRelease` has been fetched and accepted.
    pub fn is_verified(&self) -> bool {
        self.trusted.initialized()
    }

    /// The resolver used to fetch content.
    pub fn resolver(&self) -> &dyn DataResolver {
        self.resolver.as_ref()
    }

    /// Resolve a path relative to `dists/<suite>/`.
    pub fn dist_url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!(
            "dists/{}/{}",
            self.suite.trim_matches('/'),
            path.trim_start_matches('/')
        ))?)
    }

    /// Resolve a path relative to the repository root, such as a pool path.
    pub fn pool_url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Fetch and verify `InRelease`, returning the table of trusted digests.
    ///
    /// The work is performed at most once per instance. Concurrent callers
    /// wait for the same attempt. A failed attempt is not cached, so a later
    /// call tries again.
    pub async fn ensure_verified(
        &self,
        progress: Option<&ProgressCallback<'_>>,
    ) -> Result<&TrustedHashTable> {
        self.trusted
            .get_or_try_init(|| self.load_release(progress))
            .await
    }

    async fn load_release(
        &self,
        progress: Option<&ProgressCallback<'_>>,
    ) -> Result<TrustedHashTable> {
        let url = self.dist_url("InRelease")?;
        let fetch_error = |e: AptError| AptError::ReleaseFetch(url.to_string(), Box::new(e));

        debug!("fetching {}", url);
        let content = self.resolver.fetch(&url).await.map_err(fetch_error)?;

        if let Some(cb) = progress {
            cb(FetchEvent::FetchBegin {
                url: url.to_string(),
                total_bytes: content.content_length,
            });
        }

        let mut data = vec![];
        let mut reader = content.reader;
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| fetch_error(e.into()))?;

        let signature_invalid = || AptError::ReleaseSignatureInvalid {
            url: url.to_string(),
            keyring: self.signed_by.clone().unwrap_or_default(),
        };

        if !verify_inline_signature(self.verifier.as_ref(), &data, self.signed_by()).await {
            return Err(signature_invalid());
        }

        let text = std::str::from_utf8(&data)?;

        if self.is_signed() && !is_cleartext_signed(text) {
            warn!("{} is not a cleartext signed document", url);
            return Err(signature_invalid());
        }

        let table = TrustedHashTable::parse_inrelease(text)?;

        if self.is_signed() {
            info!("verified {} ({} entries)", url, table.len());
        } else {
            warn!(
                "{} accepted without signature verification ({} entries)",
                url,
                table.len()
            );
        }

        Ok(table)
    }

    /// Fetch a file under `dists/<suite>/` through the chain of trust.
    ///
    /// The file must be declared by the verified `InRelease` and its content
    /// must match the declared size and digest. Content of an unsigned
    /// repository that `InRelease` does not declare is passed through
    /// unverified.
    pub async fn fetch_validated(
        &self,
        path: &str,
        progress: Option<&ProgressCallback<'_>>,
    ) -> Result<Pin<Box<dyn AsyncBufRead + Send>>> {
        let table = self.ensure_verified(progress).await?;
        let url = self.dist_url(path)?;

        let entry = match table.get(path) {
            Some(entry) => entry,
            None if self.is_signed() => {
                return Err(AptError::PathNotTrusted(url.to_string()));
            }
            None => {
                warn!("{} is not declared by InRelease; fetching unverified", url);

                let content = self.resolver.fetch(&url).await?;
                if let Some(cb) = progress {
                    cb(FetchEvent::FetchBegin {
                        url: url.to_string(),
                        total_bytes: content.content_length,
                    });
                }

                return Ok(Box::pin(futures::io::BufReader::new(content.reader)));
            }
        };

        if let Some(cb) = progress {
            cb(FetchEvent::FetchBegin {
                url: url.to_string(),
                total_bytes: Some(entry.size),
            });
        }

        debug!("fetching {}", url);
        let data = self.resolver.fetch_bytes(&url).await?;

        if data.len() as u64 != entry.size {
            return Err(AptError::SizeMismatch {
                url: url.to_string(),
                expected: entry.size,
                actual: data.len() as u64,
            });
        }

        let digest = entry.digest.checksum_type().digest_data(&data);
        if digest != entry.digest {
            return Err(AptError::HashMismatch {
                url: url.to_string(),
                expected: entry.digest.digest_hex(),
                actual: digest.digest_hex(),
            });
        }

        Ok(Box::pin(futures::io::Cursor::new(data)))
    }
}
