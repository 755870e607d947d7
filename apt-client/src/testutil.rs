// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Test support: in-memory transports and fixed-outcome capabilities. */

use {
    crate::{
        error::{AptError, Result},
        io::{ChecksumType, DataResolver, FetchedContent},
        signing::{KeyDearmorer, SignatureVerifier},
    },
    async_compression::futures::bufread::GzipEncoder,
    async_trait::async_trait,
    futures::AsyncReadExt,
    once_cell::sync::Lazy,
    pgp::{
        crypto::{HashAlgorithm, SymmetricKeyAlgorithm},
        types::{CompressionAlgorithm, SecretKeyTrait},
        KeyType, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey,
    },
    smallvec::smallvec,
    std::{
        collections::HashMap,
        io::Cursor,
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    },
    url::Url,
};

/// Gzip compress data.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    futures::executor::block_on(async {
        let mut encoder = GzipEncoder::new(futures::io::Cursor::new(data.to_vec()));
        let mut out = Vec::new();
        encoder
            .read_to_end(&mut out)
            .await
            .expect("gzip compression of in-memory data");
        out
    })
}

/// Hex SHA-256 of data.
pub fn sha256_hex(data: &[u8]) -> String {
    ChecksumType::Sha256.digest_data(data).digest_hex()
}

/// A generated key pair for signing test documents.
pub struct TestKey {
    secret: SignedSecretKey,
    public: SignedPublicKey,
}

impl TestKey {
    fn generate(user_id: &str) -> Self {
        let mut params = SecretKeyParamsBuilder::default();
        params
            .key_type(KeyType::EdDSA)
            .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
            .preferred_hash_algorithms(smallvec![HashAlgorithm::SHA2_256, HashAlgorithm::SHA2_512])
            .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
            .can_create_certificates(false)
            .can_sign(true)
            .primary_user_id(user_id.to_string());

        let secret = params
            .build()
            .expect("key params should build")
            .generate()
            .expect("key should generate")
            .sign(String::new)
            .expect("key should self-sign");
        let public = secret
            .public_key()
            .sign(&secret, String::new)
            .expect("public key should sign");

        Self { secret, public }
    }

    /// Produce a cleartext signed message over text.
    pub fn sign(&self, text: &str) -> String {
        pgp_cleartext::cleartext_sign(
            &self.secret,
            String::new,
            HashAlgorithm::SHA2_512,
            Cursor::new(text.as_bytes()),
        )
        .expect("cleartext signing should succeed")
    }

    pub fn armored_public_key(&self) -> String {
        self.public
            .to_armored_string(None)
            .expect("public key should armor")
    }

    /// The public key in the binary form `gpg --dearmor` produces.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        pgp::ser::Serialize::to_bytes(&self.public).expect("public key should serialize")
    }
}

/// Key signing the repositories of tests.
pub static ARCHIVE_KEY: Lazy<TestKey> =
    Lazy::new(|| TestKey::generate("Example Archive <archive@example.com>"));

/// A key unrelated to [ARCHIVE_KEY].
pub static OTHER_KEY: Lazy<TestKey> =
    Lazy::new(|| TestKey::generate("Someone Else <else@example.com>"));

/// The `InRelease` body declaring the given files.
pub fn release_body<D: AsRef<[u8]>>(entries: &[(&str, D)]) -> String {
    let mut s = String::from("Origin: Example\nSuite: stable\nCodename: bookworm\nSHA256:\n");

    for (path, data) in entries {
        let data = data.as_ref();
        s.push_str(&format!(" {} {} {}\n", sha256_hex(data), data.len(), path));
    }

    s
}

/// Produce an `InRelease` document declaring the given files, signed by [ARCHIVE_KEY].
pub fn cleartext_sign<D: AsRef<[u8]>>(entries: &[(&str, D)]) -> String {
    ARCHIVE_KEY.sign(&release_body(entries))
}

/// A [DataResolver] serving registered content and recording every request.
#[derive(Default)]
pub struct MemoryResolver {
    content: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryResolver {
    pub fn insert(&self, url: &str, data: impl Into<Vec<u8>>) {
        self.content
            .lock()
            .unwrap()
            .insert(url.to_string(), data.into());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl DataResolver for MemoryResolver {
    async fn fetch(&self, url: &Url) -> Result<FetchedContent> {
        self.requests.lock().unwrap().push(url.to_string());

        // Give concurrent callers a chance to interleave.
        tokio::task::yield_now().await;

        let data = self
            .content
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| AptError::NotFound(url.to_string()))?;

        Ok(FetchedContent {
            content_length: Some(data.len() as u64),
            reader: Box::pin(futures::io::Cursor::new(data)),
        })
    }
}

enum Outcome {
    Accept,
    Reject,
    Fail,
    AcceptOnly(Vec<u8>),
}

/// A [SignatureVerifier] with a predetermined outcome.
pub struct FakeVerifier {
    outcome: Outcome,
    calls: AtomicUsize,
    keyrings: Mutex<Vec<PathBuf>>,
}

impl FakeVerifier {
    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
            keyrings: Mutex::new(vec![]),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Outcome::Accept)
    }

    pub fn rejecting() -> Self {
        Self::new(Outcome::Reject)
    }

    /// Verification cannot run, as when the tool is missing.
    pub fn failing() -> Self {
        Self::new(Outcome::Fail)
    }

    /// Accepts exactly the given bytes, like a signature over them would.
    pub fn accepting_only(content: impl Into<Vec<u8>>) -> Self {
        Self::new(Outcome::AcceptOnly(content.into()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Keyring paths of every call.
    pub fn keyrings(&self) -> Vec<PathBuf> {
        self.keyrings.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignatureVerifier for FakeVerifier {
    async fn verify_cleartext(&self, content: &[u8], keyring: &Path) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keyrings.lock().unwrap().push(keyring.to_path_buf());

        match &self.outcome {
            Outcome::Accept => Ok(true),
            Outcome::Reject => Ok(false),
            Outcome::Fail => Err(AptError::ToolInvocation(
                "gpgv".to_string(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            )),
            Outcome::AcceptOnly(expected) => Ok(expected.as_slice() == content),
        }
    }
}

/// A [KeyDearmorer] that either copies the armored file or fails.
pub struct FakeDearmorer {
    succeed: bool,
    inputs: Mutex<Vec<String>>,
}

impl FakeDearmorer {
    pub fn succeeding() -> Self {
        Self {
            succeed: true,
            inputs: Mutex::new(vec![]),
        }
    }

    pub fn failing() -> Self {
        Self {
            succeed: false,
            inputs: Mutex::new(vec![]),
        }
    }

    /// Contents of every armored file passed in.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeyDearmorer for FakeDearmorer {
    async fn dearmor(&self, armored: &Path) -> Result<PathBuf> {
        let data = std::fs::read_to_string(armored)?;
        self.inputs.lock().unwrap().push(data.clone());

        if self.succeed {
            let dest = armored.with_extension("gpg");
            std::fs::write(&dest, data)?;
            Ok(dest)
        } else {
            Err(AptError::ToolFailed(
                "gpg".to_string(),
                "no valid OpenPGP data found".to_string(),
            ))
        }
    }
}
