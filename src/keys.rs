//! Per-instance SSH key pair kept in the working-state directory.

use camino::{Utf8Path, Utf8PathBuf};
use rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey, PublicKey};
use thiserror::Error;
use tracing::{debug, info};

use crate::workdir::{self, WorkdirError};

/// File name of the private key.
pub const PRIVATE_KEY_FILE: &str = "id_gantry_ed25519";

/// File name of the public key.
pub const PUBLIC_KEY_FILE: &str = "id_gantry_ed25519.pub";

/// Errors raised while generating or loading the key pair.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum KeyError {
    /// Raised when key generation or encoding fails.
    #[error("failed to generate SSH key pair: {0}")]
    Generate(String),
    /// Raised when the stored public key cannot be parsed.
    #[error("stored public key `{path}` is invalid: {message}")]
    Invalid {
        /// Public key path.
        path: Utf8PathBuf,
        /// Parser error text.
        message: String,
    },
    /// Raised when the key files cannot be read or written.
    #[error(transparent)]
    Workdir(#[from] WorkdirError),
}

/// Key pair authorised on the instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPair {
    /// Path of the private key, referenced by the connectivity descriptor.
    pub private_key_path: Utf8PathBuf,
    /// Public key in OpenSSH single-line format.
    pub public_key: String,
}

/// Returns the private key path for `workdir`.
#[must_use]
pub fn private_key_path(workdir: &Utf8Path) -> Utf8PathBuf {
    workdir.join(PRIVATE_KEY_FILE)
}

/// Loads the key pair stored in `workdir`, generating an ed25519 pair on
/// first use.
///
/// # Errors
///
/// Returns [`KeyError`] when generation fails, a stored key is malformed, or
/// the files cannot be accessed.
pub fn ensure_key_pair(workdir: &Utf8Path) -> Result<KeyPair, KeyError> {
    let private_present = workdir::read_optional(workdir, PRIVATE_KEY_FILE)?.is_some();
    let stored_public = workdir::read_optional(workdir, PUBLIC_KEY_FILE)?;
    if let (true, Some(public)) = (private_present, stored_public) {
        let public_key = public.trim().to_owned();
        PublicKey::from_openssh(&public_key).map_err(|err| KeyError::Invalid {
            path: workdir.join(PUBLIC_KEY_FILE),
            message: err.to_string(),
        })?;
        debug!(workdir = %workdir, "reusing existing key pair");
        return Ok(KeyPair {
            private_key_path: private_key_path(workdir),
            public_key,
        });
    }

    let private = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .map_err(|err| KeyError::Generate(err.to_string()))?;
    let encoded = private
        .to_openssh(LineEnding::LF)
        .map_err(|err| KeyError::Generate(err.to_string()))?;
    let public_key = private
        .public_key()
        .to_openssh()
        .map_err(|err| KeyError::Generate(err.to_string()))?;

    let private_key_path = workdir::write_private(workdir, PRIVATE_KEY_FILE, encoded.as_bytes())?;
    workdir::write_private(workdir, PUBLIC_KEY_FILE, format!("{public_key}\n"))?;
    info!(path = %private_key_path, "generated SSH key pair");

    Ok(KeyPair {
        private_key_path,
        public_key,
    })
}
