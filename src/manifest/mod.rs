use std::collections::HashMap;
use std::path::PathBuf;

use log::{debug, info};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::networking::NetworkClient;
use crate::platform::Platform;

/// Raw copy of the last fetched manifest, kept for auditing only.
pub const SNAPSHOT_FILE: &str = "downloads.json";

/// URLs of one bundle and its detached signature.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactRef {
    pub binary: String,
    pub sig: String,
}

/// `downloads -> platform key -> language tag -> artifact`
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: Option<String>,
    pub downloads: HashMap<String, HashMap<String, ArtifactRef>>,
}

impl Manifest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Pick the artifact for `lang` on `platform`.
    ///
    /// Tries the exact tag, then its primary subtag, then the same two
    /// steps for `default_lang`. Fails instead of picking an arbitrary
    /// language when none of them is listed.
    pub fn resolve(
        &self,
        platform: &Platform,
        lang: &str,
        default_lang: &str,
    ) -> Result<&ArtifactRef> {
        let key = platform.manifest_key();
        let languages = self
            .downloads
            .get(&key)
            .ok_or_else(|| Error::PlatformUnsupported { key: key.clone() })?;

        for candidate in fallback_chain(lang, default_lang) {
            if let Some(artifact) = languages.get(candidate) {
                debug!("manifest: {key}/{lang} resolved via '{candidate}'");
                return Ok(artifact);
            }
        }

        Err(Error::LanguageUnresolved {
            requested: lang.to_owned(),
            default: default_lang.to_owned(),
        })
    }
}

/// Text before the first hyphen of an IETF tag.
pub fn primary_subtag(lang: &str) -> &str {
    lang.split('-').next().unwrap_or(lang)
}

fn fallback_chain<'a>(lang: &'a str, default_lang: &'a str) -> Vec<&'a str> {
    let mut chain: Vec<&str> = Vec::with_capacity(4);
    for candidate in [
        lang,
        primary_subtag(lang),
        default_lang,
        primary_subtag(default_lang),
    ] {
        if !candidate.is_empty() && !chain.contains(&candidate) {
            chain.push(candidate);
        }
    }
    chain
}

/// Fetches the update manifest and maps a language to artifact URLs.
pub struct ManifestResolver {
    client: NetworkClient,
    url: String,
    snapshot_path: PathBuf,
    platform: Platform,
    default_lang: String,
}

impl ManifestResolver {
    pub fn new(
        client: NetworkClient,
        url: impl Into<String>,
        snapshot_path: impl Into<PathBuf>,
        platform: Platform,
        default_lang: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            snapshot_path: snapshot_path.into(),
            platform,
            default_lang: default_lang.into(),
        }
    }

    /// Download the manifest and overwrite the on-disk snapshot with it.
    pub async fn fetch(&self) -> Result<Manifest> {
        info!("manifest: fetching {}", self.url);
        let bytes = self.client.get_bytes(&self.url).await?;
        self.write_snapshot(&bytes).await?;
        let manifest = Manifest::from_slice(&bytes)?;
        debug!(
            "manifest: version {:?} with {} platforms",
            manifest.version,
            manifest.downloads.len()
        );
        Ok(manifest)
    }

    pub async fn resolve(&self, lang: &str) -> Result<ArtifactRef> {
        let manifest = self.fetch().await?;
        let artifact = manifest.resolve(&self.platform, lang, &self.default_lang)?;
        info!("manifest: {} -> {}", lang, artifact.binary);
        Ok(artifact.clone())
    }

    async fn write_snapshot(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        tokio::fs::write(&self.snapshot_path, bytes)
            .await
            .map_err(|e| Error::io(&self.snapshot_path, e))
    }
}
