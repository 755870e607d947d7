// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signature verification and key preparation.

Trust decisions are delegated to implementations of [SignatureVerifier].
[GpgvVerifier] runs `gpgv` against a keyring file. [PgpVerifier] checks
signatures in process using the `pgp` crate. Inline armored keys from
`Signed-By` fields are converted to binary keyrings by a [KeyDearmorer], of
which [GpgDearmorer] runs `gpg --dearmor`.
*/

use {
    crate::{
        config::{ClientConfig, SignatureBackend},
        error::{AptError, Result},
        repository::release::read_cleartext_signed,
    },
    async_trait::async_trait,
    log::{debug, info, warn},
    pgp::{Deserializable, SignedPublicKey},
    pgp_cleartext::CleartextSignatures,
    std::{
        io::{Cursor, Write},
        path::{Path, PathBuf},
        process::{Output, Stdio},
        sync::Arc,
        time::Duration,
    },
    tokio::process::Command,
};

/// Status line emitted by `gpgv --status-fd` for a good signature.
const GOODSIG_STATUS: &str = "[GNUPG:] GOODSIG";

const PUBLIC_KEY_BLOCK_HEADER: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";

/// Verifies inline (cleartext) signed documents against a keyring.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Whether `content` carries a good signature from a key in `keyring`.
    ///
    /// Errors indicate the verification could not be performed at all.
    async fn verify_cleartext(&self, content: &[u8], keyring: &Path) -> Result<bool>;
}

/// Converts an armored public key file to a binary keyring.
#[async_trait]
pub trait KeyDearmorer: Send + Sync {
    /// Dearmor the key at `armored`, returning the path of the binary keyring.
    async fn dearmor(&self, armored: &Path) -> Result<PathBuf>;
}

async fn run_tool(mut command: Command, program: &str, timeout: Duration) -> Result<Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(AptError::ToolInvocation(program.to_string(), e)),
        Err(_) => Err(AptError::ToolTimeout(program.to_string(), timeout)),
    }
}

/// A [SignatureVerifier] running `gpgv`.
#[derive(Clone, Debug)]
pub struct GpgvVerifier {
    program: String,
    timeout: Duration,
}

impl GpgvVerifier {
    pub fn new(program: impl ToString, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.gpgv_program, config.verify_timeout())
    }
}

#[async_trait]
impl SignatureVerifier for GpgvVerifier {
    async fn verify_cleartext(&self, content: &[u8], keyring: &Path) -> Result<bool> {
        let mut signed = tempfile::Builder::new()
            .prefix("apt-client-")
            .suffix(".asc")
            .tempfile()?;
        signed.write_all(content)?;
        signed.flush()?;

        let mut command = Command::new(&self.program);
        command
            .arg("--status-fd")
            .arg("1")
            .arg("--keyring")
            .arg(keyring)
            .arg(signed.path());

        let output = run_tool(command, &self.program, self.timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if stdout.contains(GOODSIG_STATUS) {
            Ok(true)
        } else {
            warn!(
                "{} reported no good signature (exit {}): {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            Ok(false)
        }
    }
}

/// Read the public keys of a keyring file.
///
/// Both binary keyrings, as written by `gpg --dearmor`, and ASCII armored key
/// blocks are accepted. Keys that cannot be parsed are skipped.
pub fn read_keyring(path: &Path) -> Result<Vec<SignedPublicKey>> {
    let data = std::fs::read(path)
        .map_err(|e| AptError::RepositoryIoPath(format!("{}", path.display()), e))?;

    let armored = std::str::from_utf8(&data)
        .map(|s| s.trim_start().starts_with(PUBLIC_KEY_BLOCK_HEADER))
        .unwrap_or(false);

    let keys = if armored {
        SignedPublicKey::from_armor_many(Cursor::new(&data))?.0
    } else {
        SignedPublicKey::from_bytes_many(Cursor::new(&data))
    };

    Ok(keys
        .filter_map(|key| match key {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("skipping unreadable key in {}: {:?}", path.display(), e);
                None
            }
        })
        .collect())
}

fn signed_by_key(signatures: &CleartextSignatures, key: &SignedPublicKey) -> bool {
    signatures.verify(key).is_ok()
        || key
            .public_subkeys
            .iter()
            .any(|subkey| signatures.verify(&subkey.key).is_ok())
}

/// A [SignatureVerifier] checking signatures in process.
///
/// Verification succeeds when any signature of the document was made by a key
/// of the keyring, or by one of its subkeys.
#[derive(Clone, Copy, Debug, Default)]
pub struct PgpVerifier;

#[async_trait]
impl SignatureVerifier for PgpVerifier {
    async fn verify_cleartext(&self, content: &[u8], keyring: &Path) -> Result<bool> {
        let keys = read_keyring(keyring)?;
        if keys.is_empty() {
            warn!("keyring {} holds no usable keys", keyring.display());
            return Ok(false);
        }

        let signatures = match read_cleartext_signed(content) {
            Ok((_, signatures)) => signatures,
            Err(e) => {
                warn!("{}", e);
                return Ok(false);
            }
        };

        if keys.iter().any(|key| signed_by_key(&signatures, key)) {
            Ok(true)
        } else {
            warn!(
                "no signature made by a key of {} verified",
                keyring.display()
            );
            Ok(false)
        }
    }
}

/// Obtain the [SignatureVerifier] selected by a [ClientConfig].
pub fn verifier_from_config(config: &ClientConfig) -> Arc<dyn SignatureVerifier> {
    match config.signature_backend {
        SignatureBackend::Gpgv => Arc::new(GpgvVerifier::from_config(config)),
        SignatureBackend::Native => Arc::new(PgpVerifier),
    }
}

/// A [KeyDearmorer] running `gpg --dearmor`.
#[derive(Clone, Debug)]
pub struct GpgDearmorer {
    program: String,
    timeout: Duration,
}

impl GpgDearmorer {
    pub fn new(program: impl ToString, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.gpg_program, config.dearmor_timeout())
    }
}

#[async_trait]
impl KeyDearmorer for GpgDearmorer {
    async fn dearmor(&self, armored: &Path) -> Result<PathBuf> {
        let mut dest = armored.as_os_str().to_os_string();
        dest.push(".gpg");
        let dest = PathBuf::from(dest);

        let mut command = Command::new(&self.program);
        command
            .arg("--dearmor")
            .arg("--batch")
            .arg("--yes")
            .arg("-o")
            .arg(&dest)
            .arg(armored);

        let output = run_tool(command, &self.program, self.timeout).await?;

        if output.status.success() && dest.exists() {
            Ok(dest)
        } else {
            Err(AptError::ToolFailed(
                self.program.clone(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// Decide whether a signed document is trusted.
///
/// An absent or blank keyring reference marks a repository as explicitly
/// unverified and always passes. A keyring that does not exist, a failure to
/// run the verifier and a bad signature all fail.
///
/// Relative keyring paths are resolved against the current directory and the
/// verifier is handed the absolute path.
pub async fn verify_inline_signature(
    verifier: &dyn SignatureVerifier,
    content: &[u8],
    keyring: Option<&str>,
) -> bool {
    let keyring = match keyring.map(|k| k.trim()) {
        Some(k) if !k.is_empty() => k,
        _ => {
            debug!("no signing key configured; skipping signature verification");
            return true;
        }
    };

    let keyring = match std::fs::canonicalize(keyring) {
        Ok(path) => path,
        Err(e) => {
            warn!("keyring {} is not usable: {}", keyring, e);
            return false;
        }
    };

    match verifier.verify_cleartext(content, &keyring).await {
        Ok(true) => {
            info!("good signature from keyring {}", keyring.display());
            true
        }
        Ok(false) => false,
        Err(e) => {
            warn!("signature verification could not run: {}", e);
            false
        }
    }
}
