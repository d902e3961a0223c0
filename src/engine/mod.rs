use std::path::PathBuf;

use log::{info, warn};
use tokio::sync::mpsc;

use crate::assets::BundledAssets;
use crate::config::Config;
use crate::download::Fetcher;
use crate::engine::state::PipelineState;
use crate::error::{Error, Result};
use crate::install::{InstallState, Installer};
use crate::manifest::{ArtifactRef, ManifestResolver};
use crate::networking::NetworkClient;
use crate::proxy::{ProxyGate, ProxyProbe};
use crate::util;
use crate::verify::{SignatureVerifier, VerifiedArtifact};

pub mod state;

/// Local copies of a bundle and its detached signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifacts {
    pub binary: PathBuf,
    pub signature: PathBuf,
}

/// Runs resolve, fetch, verify and install one after another for a single
/// language. Each stage consumes what the previous one produced.
pub struct Downloader {
    config: Config,
    client: NetworkClient,
    state: PipelineState,
    updates: Option<mpsc::UnboundedSender<PipelineState>>,
}

impl Downloader {
    pub fn new(config: Config) -> Result<Self> {
        let client = NetworkClient::new(config.http_proxy.as_deref())?;
        Ok(Self {
            config,
            client,
            state: PipelineState::Idle,
            updates: None,
        })
    }

    /// Also publish every state change on `updates`.
    #[cfg(test)]
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<PipelineState>) -> Self {
        self.updates = Some(updates);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    fn set_state(&mut self, state: PipelineState) {
        info!("pipeline: {state}");
        if let Some(updates) = &self.updates {
            let _ = updates.send(state.clone());
        }
        self.state = state;
    }

    fn fail(&mut self, err: Error) -> Error {
        self.set_state(PipelineState::Failed(err.to_string()));
        err
    }

    /// Poll the proxy. The result is advisory; the caller decides whether
    /// to continue without it.
    pub async fn wait_for_proxy<P: ProxyProbe>(&mut self, gate: &ProxyGate, probe: &P) -> bool {
        self.set_state(PipelineState::WaitingForProxy);
        let ready = gate.await_proxy(probe).await;
        if !ready {
            warn!("pipeline: proxy did not answer, continuing is up to the caller");
        }
        ready
    }

    /// Create the working directories and copy bundled assets into them.
    pub fn prepare(&self) -> Result<()> {
        BundledAssets::built_in()
            .with_override_dir(self.config.assets_dir.clone())
            .materialize(&self.config.download_dir, &self.config.unpack_dir)
    }

    pub async fn resolve(&mut self, lang: &str) -> Result<ArtifactRef> {
        self.set_state(PipelineState::Resolving);
        let resolver = ManifestResolver::new(
            self.client.clone(),
            &self.config.manifest_url,
            self.config.manifest_snapshot_path(),
            self.config.platform,
            &self.config.default_lang,
        );
        resolver.resolve(lang).await
    }

    /// Fetch the signature, then the binary. Names come from the platform,
    /// so a changed URL reuses the same local file.
    pub async fn download(&mut self, lang: &str, urls: &ArtifactRef) -> Result<DownloadedArtifacts> {
        let fetcher = Fetcher::new(self.client.clone(), &self.config.download_dir);

        let signature_name = self.config.platform.signature_name(lang);
        self.set_state(PipelineState::Downloading {
            file: signature_name.clone(),
        });
        let signature = fetcher.fetch(&urls.sig, &signature_name).await?;

        let binary_name = self.config.platform.artifact_name(lang);
        self.set_state(PipelineState::Downloading {
            file: binary_name.clone(),
        });
        let binary = fetcher.fetch(&urls.binary, &binary_name).await?;

        Ok(DownloadedArtifacts { binary, signature })
    }

    pub fn verify(&mut self, artifacts: &DownloadedArtifacts) -> Result<VerifiedArtifact> {
        self.set_state(PipelineState::Verifying);
        SignatureVerifier::in_dir(&self.config.download_dir)
            .verify(&artifacts.binary, &artifacts.signature)
    }

    pub fn install(&mut self, artifact: &VerifiedArtifact, lang: &str) -> Result<PathBuf> {
        self.set_state(PipelineState::Installing);
        let path = Installer::new(self.config.platform, &self.config.unpack_dir)
            .install(artifact, lang)?;
        self.set_state(PipelineState::Installed { path: path.clone() });
        Ok(path)
    }

    /// Full pipeline for the configured language.
    pub async fn run(&mut self) -> Result<PathBuf> {
        let lang = self.config.lang.clone();
        match self.run_stages(&lang).await {
            Ok(path) => Ok(path),
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn run_stages(&mut self, lang: &str) -> Result<PathBuf> {
        self.prepare()?;
        let urls = self.resolve(lang).await?;
        let artifacts = self.download(lang, &urls).await?;
        let verified = self.verify(&artifacts)?;
        self.install(&verified, lang)
    }

    pub fn install_state(&self, lang: &str) -> InstallState {
        Installer::new(self.config.platform, &self.config.unpack_dir).state(lang)
    }

    /// Bundle and signature for `lang` that are already on disk.
    pub fn cached_artifacts(&self, lang: &str) -> Vec<PathBuf> {
        let platform = self.config.platform;
        [platform.signature_name(lang), platform.artifact_name(lang)]
            .into_iter()
            .map(|name| self.config.download_dir.join(name))
            .filter(|path| util::exists(path))
            .collect()
    }
}
