use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::networking::NetworkClient;
use crate::util;

const MARKER_SUFFIX: &str = ".last-url";
const PARTIAL_SUFFIX: &str = ".part";
const LOCK_SUFFIX: &str = ".lock";

/// Decides whether an artifact must be fetched, keyed on the URL that last
/// populated it.
#[derive(Debug, Clone)]
pub struct CacheGuard {
    dir: PathBuf,
}

impl CacheGuard {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{MARKER_SUFFIX}"))
    }

    /// Returns true when `name` is missing or was last fetched from a
    /// different URL. `url` is recorded afterwards whatever the outcome, so
    /// the decision always reflects the previous call's marker.
    pub fn needs_fetch(&self, url: &str, name: &str) -> bool {
        let decision = self.compare(url, name);
        let marker = self.marker_path(name);
        if let Err(err) = fs::write(&marker, url) {
            warn!("fetch: unable to record {}: {err}", marker.display());
        }
        decision
    }

    fn compare(&self, url: &str, name: &str) -> bool {
        if !util::exists(&self.artifact_path(name)) {
            return true;
        }
        match fs::read_to_string(self.marker_path(name)) {
            Ok(last_url) => last_url != url,
            Err(_) => true,
        }
    }

    /// Forget the recorded URL so the next call refetches.
    pub fn invalidate(&self, name: &str) {
        let marker = self.marker_path(name);
        match fs::remove_file(&marker) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("fetch: unable to clear {}: {err}", marker.display()),
        }
    }
}

/// Advisory per-artifact lock, released on drop.
struct ArtifactLock {
    file: File,
    path: PathBuf,
}

impl ArtifactLock {
    fn acquire(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{name}{LOCK_SUFFIX}"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        FileExt::try_lock_exclusive(&file).map_err(|_| Error::Locked { path: path.clone() })?;
        Ok(Self { file, path })
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!("fetch: unlock {} failed: {err}", self.path.display());
        }
    }
}

/// Writes remote artifacts into the download directory, skipping ones the
/// cache guard says are current.
pub struct Fetcher {
    client: NetworkClient,
    guard: CacheGuard,
    dir: PathBuf,
}

impl Fetcher {
    pub fn new(client: NetworkClient, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            client,
            guard: CacheGuard::new(&dir),
            dir,
        }
    }

    pub async fn fetch(&self, url: &str, name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        let _lock = ArtifactLock::acquire(&self.dir, name)?;

        let path = self.guard.artifact_path(name);
        debug!("fetch: checking {url} -> {}", path.display());
        if !self.guard.needs_fetch(url, name) {
            info!("fetch: {name} is current, skipping download");
            return Ok(path);
        }
        // The marker already names `url`, so an older artifact must not
        // survive an interrupted transfer.
        match fs::remove_file(&path) {
            Ok(()) => debug!("fetch: removed stale {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(Error::io(&path, err)),
        }

        let partial = self.dir.join(format!("{name}{PARTIAL_SUFFIX}"));
        info!("fetch: downloading {url}");
        match self.client.download_to_path(url, &partial).await {
            Ok(bytes) => {
                fs::rename(&partial, &path).map_err(|e| Error::io(&path, e))?;
                info!("fetch: wrote {bytes} bytes to {}", path.display());
                Ok(path)
            }
            Err(err) => {
                let _ = fs::remove_file(&partial);
                self.guard.invalidate(name);
                warn!("fetch: {name} failed: {err}");
                Err(err)
            }
        }
    }
}
