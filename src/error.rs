use std::path::PathBuf;

use thiserror::Error;

use crate::verify::VerifyError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("download of {url} incomplete: got {received} of {expected} bytes")]
    Truncated {
        url: String,
        received: u64,
        expected: u64,
    },

    #[error("manifest parse error: {0}")]
    ManifestParse(#[from] serde_json::Error),

    #[error("manifest has no downloads for platform '{key}'")]
    PlatformUnsupported { key: String },

    #[error("manifest has no entry for language '{requested}' nor default '{default}'")]
    LanguageUnresolved { requested: String, default: String },

    #[error("signature check failed for {}: {source}", path.display())]
    SignatureInvalid {
        path: PathBuf,
        #[source]
        source: VerifyError,
    },

    #[error("install failed: {message}")]
    InstallFailed { message: String },

    #[error("asset '{name}' is not built in and was not found in the assets directory")]
    MissingAsset { name: String },

    #[error("{} is locked by another fetch", path.display())]
    Locked { path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Error::Network {
            url: url.into(),
            source,
        }
    }

    pub fn install<S: Into<String>>(message: S) -> Self {
        Error::InstallFailed {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
