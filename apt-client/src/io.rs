// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers. */

use {
    crate::error::Result,
    async_compression::futures::bufread::GzipDecoder,
    async_trait::async_trait,
    digest::DynDigest,
    futures::{AsyncBufRead, AsyncRead, AsyncReadExt},
    pin_project::pin_project,
    std::{
        fmt::Formatter,
        pin::Pin,
        task::{Context, Poll},
    },
    url::Url,
};

/// A cryptographic digest algorithm used by repository metadata.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumType {
    /// Name of the field in `[In]Release` files holding digests of this type.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// Name of the field in package indices holding digests of this type.
    pub fn package_field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// Length in bytes of digests of this type.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Create a new hasher for this digest type.
    pub fn new_hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            Self::Md5 => Box::new(md5::Md5::default()),
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
            Self::Sha512 => Box::new(sha2::Sha512::default()),
        }
    }

    /// Compute the digest of an in-memory buffer.
    pub fn digest_data(&self, data: &[u8]) -> ContentDigest {
        let mut hasher = self.new_hasher();
        hasher.update(data);

        ContentDigest::new(*self, hasher.finalize().into_vec())
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct ContentDigest {
    checksum: ChecksumType,
    digest: Vec<u8>,
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self.checksum, self.digest_hex())
    }
}

impl ContentDigest {
    fn new(checksum: ChecksumType, digest: Vec<u8>) -> Self {
        Self { checksum, digest }
    }

    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    ///
    /// Hex digits are accepted in either case. The decoded length must match
    /// the digest type.
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let bytes = hex::decode(digest)?;

        if bytes.len() != checksum.digest_len() {
            return Err(hex::FromHexError::InvalidStringLength.into());
        }

        Ok(Self::new(checksum, bytes))
    }

    /// Create a new SHA-256 instance by parsing a hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha256, digest)
    }

    /// Obtain the lowercase hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum
    }
}

/// Compression format used by repository indices.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// Gzip compression (.gz extension).
    Gzip,
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
        }
    }

    /// The retrieval preference order for package indices.
    pub fn preferred_order() -> impl Iterator<Item = Compression> {
        [Self::Gzip, Self::None].into_iter()
    }
}

/// Wrap a reader with transparent decompression.
pub fn read_decompressed(
    stream: Pin<Box<dyn AsyncBufRead + Send>>,
    compression: Compression,
) -> Pin<Box<dyn AsyncRead + Send>> {
    match compression {
        Compression::None => Box::pin(stream),
        Compression::Gzip => Box::pin(GzipDecoder::new(stream)),
    }
}

/// An [AsyncRead] stream adapter that computes a [ContentDigest] as data is read.
#[pin_project]
pub struct DigestingReader<R> {
    checksum: ChecksumType,
    hasher: Box<dyn DynDigest + Send>,
    bytes_read: u64,
    #[pin]
    source: R,
}

impl<R> DigestingReader<R> {
    /// Construct a new instance from a source reader.
    pub fn new(source: R, checksum: ChecksumType) -> Self {
        Self {
            checksum,
            hasher: checksum.new_hasher(),
            bytes_read: 0,
            source,
        }
    }

    /// Number of bytes that passed through this reader so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Finish the stream.
    ///
    /// Returns the source reader and the digest of all content read.
    pub fn finish(self) -> (R, ContentDigest) {
        let digest = ContentDigest::new(self.checksum, self.hasher.finalize().into_vec());

        (self.source, digest)
    }
}

impl<R> AsyncRead for DigestingReader<R>
where
    R: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.project();

        match this.source.poll_read(cx, buf) {
            Poll::Ready(Ok(size)) => {
                if size > 0 {
                    this.hasher.update(&buf[0..size]);
                    *this.bytes_read += size as u64;
                }

                Poll::Ready(Ok(size))
            }
            res => res,
        }
    }
}

/// Progress notifications emitted while fetching content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchEvent {
    /// A metadata fetch is starting.
    FetchBegin {
        url: String,
        total_bytes: Option<u64>,
    },

    /// Bytes of a package artifact have been received.
    DownloadProgress {
        url: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },
}

impl std::fmt::Display for FetchEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchBegin {
                url,
                total_bytes: Some(size),
            } => write!(f, "fetching {} ({} bytes)", url, size),
            Self::FetchBegin {
                url,
                total_bytes: None,
            } => write!(f, "fetching {}", url),
            Self::DownloadProgress {
                url,
                bytes_downloaded,
                total_bytes: Some(total),
            } => write!(f, "{}: {}/{} bytes", url, bytes_downloaded, total),
            Self::DownloadProgress {
                url,
                bytes_downloaded,
                total_bytes: None,
            } => write!(f, "{}: {} bytes", url, bytes_downloaded),
        }
    }
}

/// Receiver of [FetchEvent].
pub type ProgressCallback<'a> = dyn Fn(FetchEvent) + Send + Sync + 'a;

/// Content obtained from a [DataResolver].
pub struct FetchedContent {
    /// The length of the content, if the transport announced it.
    pub content_length: Option<u64>,

    /// The raw content.
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

/// Generic mechanism for obtaining content at a given URL.
///
/// Implementations only need to implement `fetch()`.
#[async_trait]
pub trait DataResolver: Send + Sync {
    /// Open the content at a URL as an async reader.
    ///
    /// Missing content resolves to [crate::error::AptError::NotFound].
    async fn fetch(&self, url: &Url) -> Result<FetchedContent>;

    /// Read the full content at a URL into memory.
    async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let mut content = self.fetch(url).await?;

        let mut data = Vec::new();
        content.reader.read_to_end(&mut data).await?;

        Ok(data)
    }
}
