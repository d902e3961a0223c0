use std::borrow::Cow;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::util;
use crate::verify::TRUSTED_KEY_FILE;

pub const EXTENSION_FILE: &str = "default-extension.xpi";

/// A file compiled into the binary. Empty contents mean "not shipped".
struct Asset {
    name: &'static str,
    bytes: &'static [u8],
}

const BUILT_IN: &[Asset] = &[
    Asset {
        name: TRUSTED_KEY_FILE,
        bytes: include_bytes!("../assets/TPO-signing-key.pub"),
    },
    Asset {
        name: EXTENSION_FILE,
        bytes: include_bytes!("../assets/default-extension.xpi"),
    },
];

/// Read-only asset set shipped with the binary, optionally overridden by
/// files in a directory.
///
/// The trusted key is copied from here rather than downloaded, so the
/// channel being verified never supplies its own key.
pub struct BundledAssets {
    override_dir: Option<PathBuf>,
    built_in: &'static [Asset],
}

impl BundledAssets {
    pub fn built_in() -> Self {
        Self {
            override_dir: None,
            built_in: BUILT_IN,
        }
    }

    #[cfg(test)]
    fn from_static(built_in: &'static [Asset]) -> Self {
        Self {
            override_dir: None,
            built_in,
        }
    }

    pub fn with_override_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.override_dir = dir;
        self
    }

    fn read(&self, name: &str) -> Result<Cow<'static, [u8]>> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(name);
            match fs::read(&path) {
                Ok(bytes) => return Ok(Cow::Owned(bytes)),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("assets: {} absent, using built-in copy", path.display());
                }
                Err(err) => return Err(Error::io(&path, err)),
            }
        }
        self.built_in
            .iter()
            .find(|asset| asset.name == name && !asset.bytes.is_empty())
            .map(|asset| Cow::Borrowed(asset.bytes))
            .ok_or_else(|| Error::MissingAsset {
                name: name.to_owned(),
            })
    }

    /// Create the download and unpack directories and copy in first-run
    /// assets. Files already on disk are never overwritten.
    pub fn materialize(&self, download_dir: &Path, unpack_dir: &Path) -> Result<()> {
        crate::env::ensure_base_dirs(download_dir, unpack_dir)
            .map_err(|e| Error::io(download_dir, e))?;

        let key_path = download_dir.join(TRUSTED_KEY_FILE);
        if util::exists(&key_path) {
            debug!("assets: keeping existing {}", key_path.display());
        } else {
            info!("assets: trusted key not found, installing bundled copy");
            let bytes = self.read(TRUSTED_KEY_FILE)?;
            fs::write(&key_path, bytes).map_err(|e| Error::io(&key_path, e))?;
        }

        let extension_path = unpack_dir.join(EXTENSION_FILE);
        if !util::exists(&extension_path) {
            match self.read(EXTENSION_FILE) {
                Ok(bytes) => {
                    info!("assets: installing bundled browser extension");
                    let mirror_copy = download_dir.join(EXTENSION_FILE);
                    fs::write(&extension_path, &bytes)
                        .map_err(|e| Error::io(&extension_path, e))?;
                    fs::write(&mirror_copy, &bytes).map_err(|e| Error::io(&mirror_copy, e))?;
                }
                Err(err) => warn!("assets: {err}; continuing without it"),
            }
        }
        Ok(())
    }
}
