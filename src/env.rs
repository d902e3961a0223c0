use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DOWNLOAD_DIR_NAME: &str = "tor-browser";
pub const UNPACK_DIR_NAME: &str = "unpack";

/// Returns the working directory used when none is configured.
pub fn default_working_dir() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Makes `dir` absolute against the process working directory.
pub fn absolutize(dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        default_working_dir().join(dir)
    }
}

pub fn download_dir(root: &Path) -> PathBuf {
    root.join(DOWNLOAD_DIR_NAME)
}

pub fn unpack_dir(root: &Path) -> PathBuf {
    root.join(UNPACK_DIR_NAME)
}

/// Installed bundle directory for one language.
pub fn browser_dir(unpack_dir: &Path, lang: &str) -> PathBuf {
    unpack_dir.join(format!("tor-browser_{lang}"))
}

/// Create the on-disk folder layout expected by the downloader.
pub fn ensure_base_dirs(download_dir: &Path, unpack_dir: &Path) -> std::io::Result<()> {
    for dir in [download_dir, unpack_dir] {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
