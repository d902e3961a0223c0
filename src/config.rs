use std::path::PathBuf;

use crate::env;
use crate::platform::Platform;

pub const MANIFEST_URL: &str =
    "https://aus1.torproject.org/torbrowser/update_3/release/downloads.json";
pub const DEFAULT_LANG: &str = "en-US";

/// Everything a downloader needs, resolved once and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub download_dir: PathBuf,
    pub unpack_dir: PathBuf,
    /// Directory whose files take precedence over the built-in assets.
    pub assets_dir: Option<PathBuf>,
    pub lang: String,
    pub default_lang: String,
    pub platform: Platform,
    pub manifest_url: String,
    /// HTTP proxy (`host:port`) that manifest and artifact requests go through.
    pub http_proxy: Option<String>,
    pub verbose: bool,
}

impl Config {
    /// Layout rooted at `working_dir`, with the platform detected from the build target.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let root = env::absolutize(&working_dir.into());
        Self {
            download_dir: env::download_dir(&root),
            unpack_dir: env::unpack_dir(&root),
            assets_dir: None,
            lang: DEFAULT_LANG.to_owned(),
            default_lang: DEFAULT_LANG.to_owned(),
            platform: Platform::detect(),
            manifest_url: MANIFEST_URL.to_owned(),
            http_proxy: None,
            verbose: false,
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_default_lang(mut self, lang: impl Into<String>) -> Self {
        self.default_lang = lang.into();
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = Some(dir.into());
        self
    }

    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = url.into();
        self
    }

    pub fn with_http_proxy(mut self, proxy: Option<String>) -> Self {
        self.http_proxy = proxy;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn manifest_snapshot_path(&self) -> PathBuf {
        self.download_dir.join(crate::manifest::SNAPSHOT_FILE)
    }
}
