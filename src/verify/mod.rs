//! Detached OpenPGP signature checks against the trusted signing key.
//!
//! This is the only place a [`VerifiedArtifact`] can be created, and the
//! installer accepts nothing else.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use log::{info, warn};
use pgp::{Deserializable, SignedPublicKey, StandaloneSignature};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::util;

pub const TRUSTED_KEY_FILE: &str = "TPO-signing-key.pub";

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("trusted key is not a usable OpenPGP public key: {0}")]
    InvalidKey(String),

    #[error("signature could not be parsed: {0}")]
    MalformedSignature(String),

    #[error("signature does not match the trusted key")]
    BadSignature,
}

/// A binary whose detached signature has been checked.
#[derive(Debug, Clone)]
pub struct VerifiedArtifact {
    path: PathBuf,
    sha256: String,
}

impl VerifiedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    #[cfg(test)]
    pub(crate) fn assume_verified(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            sha256: String::new(),
        }
    }
}

pub struct SignatureVerifier {
    key_path: PathBuf,
}

impl SignatureVerifier {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }

    /// Verifier using the trusted key kept in `download_dir`.
    pub fn in_dir(download_dir: &Path) -> Self {
        Self::new(download_dir.join(TRUSTED_KEY_FILE))
    }

    /// Checks `binary` against `signature`. Every failure, whatever its
    /// cause, is reported as `Error::SignatureInvalid`.
    pub fn verify(&self, binary: &Path, signature: &Path) -> Result<VerifiedArtifact> {
        match self.check(binary, signature) {
            Ok(()) => {
                let sha256 = util::sha256_file(binary).map_err(|e| Error::io(binary, e))?;
                info!("verify: {} ok (sha256 {sha256})", binary.display());
                Ok(VerifiedArtifact {
                    path: binary.to_path_buf(),
                    sha256,
                })
            }
            Err(source) => {
                warn!("verify: {} rejected: {source}", binary.display());
                Err(Error::SignatureInvalid {
                    path: binary.to_path_buf(),
                    source,
                })
            }
        }
    }

    fn check(&self, binary: &Path, signature: &Path) -> std::result::Result<(), VerifyError> {
        let key = load_key(&read(&self.key_path)?)?;
        let signature = load_signature(&read(signature)?)?;
        let content = read(binary)?;

        if signature.verify(&key, &content).is_ok() {
            return Ok(());
        }
        // Release signatures are usually made by a signing subkey.
        for subkey in &key.public_subkeys {
            if signature.verify(subkey, &content).is_ok() {
                return Ok(());
            }
        }
        Err(VerifyError::BadSignature)
    }
}

fn read(path: &Path) -> std::result::Result<Vec<u8>, VerifyError> {
    fs::read(path).map_err(|source| VerifyError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

fn load_key(bytes: &[u8]) -> std::result::Result<SignedPublicKey, VerifyError> {
    let key = match SignedPublicKey::from_armor_single(Cursor::new(bytes)) {
        Ok((key, _headers)) => key,
        Err(_) => SignedPublicKey::from_bytes(Cursor::new(bytes))
            .map_err(|e| VerifyError::InvalidKey(e.to_string()))?,
    };
    key.verify()
        .map_err(|e| VerifyError::InvalidKey(e.to_string()))?;
    Ok(key)
}

fn load_signature(bytes: &[u8]) -> std::result::Result<StandaloneSignature, VerifyError> {
    match StandaloneSignature::from_armor_single(Cursor::new(bytes)) {
        Ok((signature, _headers)) => Ok(signature),
        Err(_) => StandaloneSignature::from_bytes(Cursor::new(bytes))
            .map_err(|e| VerifyError::MalformedSignature(e.to_string())),
    }
}
