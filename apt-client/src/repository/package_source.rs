// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Binary package indices of a repository component. */

use {
    crate::{
        control::ControlParagraphAsyncReader,
        error::{AptError, Result},
        io::{
            read_decompressed, ChecksumType, Compression, ContentDigest, DigestingReader,
            FetchEvent, ProgressCallback,
        },
        package_record::PackageRecord,
        repository::AptRepository,
    },
    futures::{io::BufReader, AsyncRead, AsyncReadExt},
    log::{debug, info},
    std::{io::Write, path::Path, pin::Pin, sync::Arc},
};

/// The binary packages of one component and architecture of a repository.
///
/// Instances are cheap to clone. All trust state lives in the shared
/// [AptRepository].
#[derive(Clone, Debug)]
pub struct PackageSource {
    repository: Arc<AptRepository>,
    component: String,
    architecture: String,
}

impl PackageSource {
    pub fn new(
        repository: Arc<AptRepository>,
        component: impl ToString,
        architecture: impl ToString,
    ) -> Self {
        Self {
            repository,
            component: component.to_string(),
            architecture: architecture.to_string(),
        }
    }

    pub fn repository(&self) -> &Arc<AptRepository> {
        &self.repository
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// Path of the `Packages` index relative to `dists/<suite>/`.
    pub fn index_path(&self, compression: Compression) -> String {
        format!(
            "{}/binary-{}/Packages{}",
            self.component,
            self.architecture,
            compression.extension()
        )
    }

    /// Fetch and parse the `Packages` index.
    ///
    /// `Packages.gz` is preferred. The uncompressed index is only tried when
    /// the compressed one is unavailable or not declared by `InRelease`. Any
    /// paragraph that cannot be mapped fails the whole fetch.
    pub async fn fetch_packages(
        &self,
        progress: Option<&ProgressCallback<'_>>,
    ) -> Result<Vec<PackageRecord>> {
        let mut last_error = None;

        for compression in Compression::preferred_order() {
            let path = self.index_path(compression);

            match self.repository.fetch_validated(&path, progress).await {
                Ok(reader) => {
                    let records = self
                        .read_packages(read_decompressed(reader, compression))
                        .await?;
                    info!(
                        "{} packages in {}dists/{}/{}",
                        records.len(),
                        self.repository.base_url(),
                        self.repository.suite(),
                        path
                    );

                    return Ok(records);
                }
                Err(e) if e.permits_index_fallback() => {
                    debug!("unable to use {}: {}", path, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AptError::NotFound(self.index_path(Compression::None))))
    }

    async fn read_packages(
        &self,
        reader: Pin<Box<dyn AsyncRead + Send>>,
    ) -> Result<Vec<PackageRecord>> {
        let mut reader = ControlParagraphAsyncReader::new(BufReader::new(reader));
        let mut records = vec![];

        while let Some(paragraph) = reader.read_paragraph().await? {
            records.push(PackageRecord::from_paragraph(
                &paragraph,
                self.repository.suite(),
                &self.component,
            )?);
        }

        Ok(records)
    }

    /// Download the package file of a record to `destination`.
    ///
    /// Content is streamed to a temporary file next to `destination` and only
    /// moved into place once its SHA-256 matches the record. Missing parent
    /// directories are created. On failure the destination is left untouched
    /// and the temporary file is removed.
    pub async fn download_package(
        &self,
        record: &PackageRecord,
        destination: &Path,
        progress: Option<&ProgressCallback<'_>>,
    ) -> Result<()> {
        let expected = ContentDigest::sha256_hex(&record.sha256)?;
        let url = self.repository.pool_url(&record.filename)?;

        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .map_err(|e| AptError::RepositoryIoPath(format!("{}", dir.display()), e))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".apt-client-")
            .suffix(".partial")
            .tempfile_in(dir)
            .map_err(|e| AptError::RepositoryIoPath(format!("{}", dir.display()), e))?;

        debug!("downloading {} to {}", url, destination.display());
        let content = self.repository.resolver().fetch(&url).await?;
        let total_bytes = content.content_length.or(Some(record.size));

        let mut reader = DigestingReader::new(content.reader, ChecksumType::Sha256);
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let count = reader.read(&mut buf).await?;
            if count == 0 {
                break;
            }

            temp.write_all(&buf[0..count])?;

            if let Some(cb) = progress {
                cb(FetchEvent::DownloadProgress {
                    url: url.to_string(),
                    bytes_downloaded: reader.bytes_read(),
                    total_bytes,
                });
            }
        }

        temp.flush()?;
        let (_, digest) = reader.finish();

        if digest != expected {
            return Err(AptError::PackageIntegrity {
                url: url.to_string(),
                expected: expected.digest_hex(),
                actual: digest.digest_hex(),
            });
        }

        temp.persist(destination).map_err(|e| {
            AptError::RepositoryIoPath(format!("{}", destination.display()), e.error)
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            config::ClientConfig,
            repository::{normalize_base_url, DefaultDataResolver},
            sources::SourceExtractor,
            testutil::{
                cleartext_sign, gzip, sha256_hex, FakeDearmorer, FakeVerifier, MemoryResolver,
            },
        },
        indoc::formatdoc,
        std::sync::Mutex,
    };

    const BASE: &str = "http://repo.example/debian/";
    const INRELEASE: &str = "http://repo.example/debian/dists/stable/InRelease";
    const PACKAGES_GZ: &str =
        "http://repo.example/debian/dists/stable/main/binary-amd64/Packages.gz";
    const PACKAGES: &str = "http://repo.example/debian/dists/stable/main/binary-amd64/Packages";
    const DEB: &str = "http://repo.example/debian/pool/main/f/foo/foo_1.0_amd64.deb";

    const DEB_CONTENT: &[u8] = b"!<arch>\ndebian-binary   pretend package content";

    fn packages_index(package: &str, deb: &[u8]) -> String {
        formatdoc! {"
            Package: {package}
            Version: 1.0
            Architecture: amd64
            Maintainer: Example <dev@example.com>
            Description: example package
            Description-md5: 0123456789abcdef0123456789abcdef
            Section: misc
            Priority: optional
            Filename: pool/main/f/foo/foo_1.0_amd64.deb
            Size: {size}
            SHA256: {sha256}
            Ruby-Versions: 3.0
            ",
            package = package,
            size = deb.len(),
            sha256 = sha256_hex(deb),
        }
    }

    struct Fixture {
        resolver: Arc<MemoryResolver>,
        source: PackageSource,
        _keyring: tempfile::NamedTempFile,
    }

    fn fixture(signed: bool) -> Result<Fixture> {
        let keyring = tempfile::NamedTempFile::new()?;
        let resolver = Arc::new(MemoryResolver::default());

        let repository = Arc::new(AptRepository::new(
            normalize_base_url(BASE)?,
            "stable",
            signed.then(|| keyring.path().display().to_string()),
            resolver.clone(),
            Arc::new(FakeVerifier::accepting()),
        ));

        Ok(Fixture {
            resolver,
            source: PackageSource::new(repository, "main", "amd64"),
            _keyring: keyring,
        })
    }

    #[tokio::test]
    async fn fetch_compressed_index() -> Result<()> {
        let f = fixture(true)?;

        let index = gzip(packages_index("foo", DEB_CONTENT).as_bytes());
        f.resolver.insert(
            INRELEASE,
            cleartext_sign(&[("main/binary-amd64/Packages.gz", &index)]),
        );
        f.resolver.insert(PACKAGES_GZ, index);

        let records = f.source.fetch_packages(None).await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].package, "foo");
        assert_eq!(records[0].origin_suite, "stable");
        assert_eq!(records[0].origin_component, "main");
        assert_eq!(
            records[0].extras.get("Ruby-Versions").map(|s| s.as_str()),
            Some("3.0")
        );
        assert_eq!(f.resolver.request_count(PACKAGES), 0);

        Ok(())
    }

    #[tokio::test]
    async fn fallback_to_uncompressed_index() -> Result<()> {
        let f = fixture(true)?;

        let index = packages_index("fallback-pkg", DEB_CONTENT);
        f.resolver.insert(
            INRELEASE,
            cleartext_sign(&[("main/binary-amd64/Packages", index.as_bytes())]),
        );
        f.resolver.insert(PACKAGES, index);

        let records = f.source.fetch_packages(None).await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].package, "fallback-pkg");

        // Packages.gz is not declared, so it is never requested.
        assert_eq!(
            f.resolver.requests(),
            vec![INRELEASE.to_string(), PACKAGES.to_string()]
        );

        Ok(())
    }

    #[tokio::test]
    async fn fallback_on_missing_compressed_index() -> Result<()> {
        let f = fixture(true)?;

        let gz = gzip(b"Package: unused\n");
        let index = packages_index("fallback-pkg", DEB_CONTENT);
        f.resolver.insert(
            INRELEASE,
            cleartext_sign(&[
                ("main/binary-amd64/Packages.gz", gz.as_slice()),
                ("main/binary-amd64/Packages", index.as_bytes()),
            ]),
        );
        f.resolver.insert(PACKAGES, index);

        let records = f.source.fetch_packages(None).await?;
        assert_eq!(records[0].package, "fallback-pkg");
        assert_eq!(f.resolver.request_count(PACKAGES_GZ), 1);

        Ok(())
    }

    #[tokio::test]
    async fn hash_mismatch_is_not_masked() -> Result<()> {
        let f = fixture(true)?;

        let index = packages_index("foo", DEB_CONTENT);
        let gz = gzip(index.as_bytes());
        f.resolver.insert(
            INRELEASE,
            cleartext_sign(&[
                ("main/binary-amd64/Packages.gz", gz.as_slice()),
                ("main/binary-amd64/Packages", index.as_bytes()),
            ]),
        );
        let mut corrupt = gz.clone();
        corrupt[10] ^= 0xff;
        f.resolver.insert(PACKAGES_GZ, corrupt);
        f.resolver.insert(PACKAGES, index);

        assert!(matches!(
            f.source.fetch_packages(None).await,
            Err(AptError::HashMismatch { .. })
        ));
        assert_eq!(f.resolver.request_count(PACKAGES), 0);

        Ok(())
    }

    #[tokio::test]
    async fn malformed_paragraph_aborts() -> Result<()> {
        let f = fixture(false)?;

        let index = format!(
            "{}\nPackage: broken\nVersion: 1.0\n",
            packages_index("foo", DEB_CONTENT)
        );
        f.resolver.insert(INRELEASE, "Suite: stable\n");
        f.resolver.insert(PACKAGES, index);

        assert!(matches!(
            f.source.fetch_packages(None).await,
            Err(AptError::PackageRequiredFieldMissing(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn no_index_available() -> Result<()> {
        let f = fixture(false)?;
        f.resolver.insert(INRELEASE, "Suite: stable\n");

        assert!(matches!(
            f.source.fetch_packages(None).await,
            Err(AptError::NotFound(url)) if url == PACKAGES
        ));

        Ok(())
    }

    fn record(f: &Fixture, deb: &[u8]) -> Result<PackageRecord> {
        let control = crate::control::ControlFile::parse_str(&packages_index("foo", deb))?;
        let paragraph = control.paragraphs().next().unwrap();

        PackageRecord::from_paragraph(paragraph, f.source.repository().suite(), "main")
    }

    fn leftover_files(dir: &Path) -> Result<Vec<String>> {
        Ok(std::fs::read_dir(dir)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().to_string()))
            .collect::<std::io::Result<Vec<_>>>()?)
    }

    #[tokio::test]
    async fn download_verified_package() -> Result<()> {
        let f = fixture(true)?;
        f.resolver.insert(DEB, DEB_CONTENT.to_vec());
        let record = record(&f, DEB_CONTENT)?;

        let td = tempfile::tempdir()?;
        let dest = td.path().join("foo.deb");
        std::fs::write(&dest, b"stale")?;

        let events = Mutex::new(vec![]);
        let cb = |event: FetchEvent| events.lock().unwrap().push(event);

        f.source.download_package(&record, &dest, Some(&cb)).await?;

        assert_eq!(std::fs::read(&dest)?, DEB_CONTENT);
        assert_eq!(leftover_files(td.path())?, vec!["foo.deb".to_string()]);
        assert_eq!(
            events.into_inner().unwrap().last(),
            Some(&FetchEvent::DownloadProgress {
                url: DEB.to_string(),
                bytes_downloaded: DEB_CONTENT.len() as u64,
                total_bytes: Some(DEB_CONTENT.len() as u64),
            })
        );

        Ok(())
    }

    #[tokio::test]
    async fn download_creates_destination_directory() -> Result<()> {
        let f = fixture(true)?;
        f.resolver.insert(DEB, DEB_CONTENT.to_vec());
        let record = record(&f, DEB_CONTENT)?;

        let td = tempfile::tempdir()?;
        let dir = td.path().join("pool").join("main");
        let dest = dir.join("foo.deb");

        f.source.download_package(&record, &dest, None).await?;

        assert_eq!(std::fs::read(&dest)?, DEB_CONTENT);
        assert_eq!(leftover_files(&dir)?, vec!["foo.deb".to_string()]);

        Ok(())
    }

    #[tokio::test]
    async fn download_integrity_failure() -> Result<()> {
        let f = fixture(true)?;
        f.resolver.insert(DEB, b"tampered package content".to_vec());
        let record = record(&f, DEB_CONTENT)?;

        let td = tempfile::tempdir()?;
        let dest = td.path().join("foo.deb");

        let err = f
            .source
            .download_package(&record, &dest, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AptError::PackageIntegrity { .. }));
        assert!(err.is_trust_violation());
        assert!(!dest.exists());
        assert!(leftover_files(td.path())?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn download_missing_package() -> Result<()> {
        let f = fixture(true)?;
        let record = record(&f, DEB_CONTENT)?;

        let td = tempfile::tempdir()?;
        let dest = td.path().join("foo.deb");

        assert!(matches!(
            f.source.download_package(&record, &dest, None).await,
            Err(AptError::NotFound(_))
        ));
        assert!(leftover_files(td.path())?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn local_repository_end_to_end() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = td.path().join("repo");
        let dist = root.join("dists").join("stable");
        std::fs::create_dir_all(dist.join("main").join("binary-amd64"))?;
        std::fs::create_dir_all(root.join("pool").join("main").join("f").join("foo"))?;

        let index = gzip(packages_index("foo", DEB_CONTENT).as_bytes());
        std::fs::write(
            dist.join("InRelease"),
            cleartext_sign(&[("main/binary-amd64/Packages.gz", &index)]),
        )?;
        std::fs::write(dist.join("main/binary-amd64/Packages.gz"), &index)?;
        std::fs::write(root.join("pool/main/f/foo/foo_1.0_amd64.deb"), DEB_CONTENT)?;

        let keyring = td.path().join("archive-keyring.gpg");
        std::fs::write(&keyring, b"keyring")?;

        let base = url::Url::from_directory_path(&root).unwrap();
        let extractor = SourceExtractor::with_capabilities(
            Arc::new(DefaultDataResolver::new(&ClientConfig::default())?),
            Arc::new(FakeVerifier::accepting()),
            Arc::new(FakeDearmorer::failing()),
        );
        let sources = extractor
            .extract(
                &format!("deb [signed-by={}] {} stable main\n", keyring.display(), base),
                "amd64",
            )
            .await;
        assert_eq!(sources.len(), 1);

        let records = sources[0].fetch_packages(None).await?;
        assert_eq!(records.len(), 1);
        assert!(sources[0].repository().is_verified());

        let dest = td.path().join("foo.deb");
        sources[0]
            .download_package(&records[0], &dest, None)
            .await?;
        assert_eq!(std::fs::read(&dest)?, DEB_CONTENT);

        Ok(())
    }
}
