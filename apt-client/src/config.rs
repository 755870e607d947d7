// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Client configuration. */

use {
    serde::{Deserialize, Serialize},
    std::time::Duration,
};

/// How inline signatures of `InRelease` files are checked.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureBackend {
    /// Run the `gpgv` program.
    Gpgv,
    /// Verify in process with the `pgp` crate.
    Native,
}

impl Default for SignatureBackend {
    fn default() -> Self {
        Self::Gpgv
    }
}

/// Tunables for fetching and verifying repository content.
///
/// Every field has a default, so an empty document deserializes to
/// [ClientConfig::default()].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Upper bound for a single HTTP request, including reading the body.
    pub fetch_timeout_secs: u64,

    /// Upper bound for establishing an HTTP connection.
    pub connect_timeout_secs: u64,

    /// Upper bound for a single `gpgv` invocation.
    pub verify_timeout_secs: u64,

    /// Upper bound for a single `gpg --dearmor` invocation.
    pub dearmor_timeout_secs: u64,

    /// Which verifier checks inline signatures.
    pub signature_backend: SignatureBackend,

    /// Program used to verify inline signatures.
    pub gpgv_program: String,

    /// Program used to convert armored keys to binary keyrings.
    pub gpg_program: String,

    /// `User-Agent` header sent with HTTP requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 60,
            connect_timeout_secs: 15,
            verify_timeout_secs: 30,
            dearmor_timeout_secs: 5,
            signature_backend: SignatureBackend::default(),
            gpgv_program: "gpgv".to_string(),
            gpg_program: "gpg".to_string(),
            user_agent: format!("apt-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn dearmor_timeout(&self) -> Duration {
        Duration::from_secs(self.dearmor_timeout_secs)
    }
}
