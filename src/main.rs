use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};

use crate::config::Config;
use crate::engine::{DownloadedArtifacts, Downloader};
use crate::install::InstallState;
use crate::platform::{Arch, Os, Platform};
use crate::proxy::{HttpProbe, ListenerProbe, ProxyGate, ProxyProbe};

mod assets;
mod config;
mod download;
mod engine;
mod env;
mod error;
mod install;
mod manifest;
mod mirror;
mod networking;
mod platform;
mod proxy;
mod util;
mod verify;

#[derive(Parser, Debug)]
#[command(
    name = "tbfetch",
    author,
    version,
    about = "Resolve, download, verify and install Tor Browser bundles"
)]
struct Cli {
    /// Directory holding the download and unpack folders.
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,

    /// Bundle language, e.g. `de` or `pt-BR`.
    #[arg(long, global = true)]
    lang: Option<String>,

    /// Language used when the requested one is not published.
    #[arg(long, global = true, default_value = config::DEFAULT_LANG)]
    default_lang: String,

    /// Override the detected operating system (linux, win, osx).
    #[arg(long, global = true)]
    os: Option<Os>,

    /// Override the detected architecture (64, 32).
    #[arg(long, global = true)]
    arch: Option<Arch>,

    #[arg(long, global = true, default_value = config::MANIFEST_URL)]
    manifest_url: String,

    /// Directory whose files replace the built-in signing key and extension.
    #[arg(long, global = true)]
    assets_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve, download, verify and install the bundle.
    Fetch {
        #[arg(long, default_value = proxy::DEFAULT_PROXY)]
        proxy: String,
        #[arg(long)]
        skip_proxy_check: bool,
        /// Abort when the proxy does not answer instead of continuing.
        #[arg(long, conflicts_with = "skip_proxy_check")]
        require_proxy: bool,
        /// Send manifest and bundle requests through the proxy.
        #[arg(long)]
        via_proxy: bool,
    },
    /// Print the bundle and signature URLs.
    Resolve,
    /// Check a bundle against its detached signature.
    Verify { binary: PathBuf, signature: PathBuf },
    /// Wait for the proxy to come up.
    Probe {
        #[arg(long, default_value = proxy::DEFAULT_PROXY)]
        proxy: String,
    },
    /// Serve the download directory as a read-only mirror on a plain TCP
    /// address. Publishing it over I2P is left to a tunnel pointed at it.
    Serve {
        #[arg(long, default_value = "127.0.0.1:7695")]
        listen: SocketAddr,
    },
    /// Show install state and cached downloads.
    Status,
}

impl Cli {
    fn config(&self) -> Config {
        let workdir = self
            .workdir
            .clone()
            .unwrap_or_else(env::default_working_dir);
        let detected = Platform::detect();
        let platform = Platform::new(
            self.os.unwrap_or(detected.os),
            self.arch.unwrap_or(detected.arch),
        );
        let mut config = Config::new(workdir)
            .with_default_lang(&self.default_lang)
            .with_platform(platform)
            .with_manifest_url(&self.manifest_url)
            .with_verbose(self.verbose);
        config = config.with_lang(self.lang.clone().unwrap_or_else(|| self.default_lang.clone()));
        if let Some(assets) = &self.assets_dir {
            config = config.with_assets_dir(env::absolutize(assets));
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.config();
    let default_filter = if config.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> anyhow::Result<ExitCode> {
    info!(
        "tbfetch {} for {} ({})",
        env!("CARGO_PKG_VERSION"),
        config.platform,
        config.lang
    );

    match command {
        Command::Fetch {
            proxy,
            skip_proxy_check,
            require_proxy,
            via_proxy,
        } => {
            let config = if via_proxy {
                config.with_http_proxy(Some(proxy.clone()))
            } else {
                config
            };
            let mut downloader = Downloader::new(config)?;
            if !skip_proxy_check {
                let ready = proxy_ready(&mut downloader, &proxy).await;
                if !ready && require_proxy {
                    anyhow::bail!("proxy at {proxy} is not available");
                }
            }
            let installed = downloader.run().await?;
            println!("{}", installed.display());
        }
        Command::Resolve => {
            let lang = config.lang.clone();
            let mut downloader = Downloader::new(config)?;
            let urls = downloader.resolve(&lang).await?;
            println!("binary: {}", urls.binary);
            println!("sig:    {}", urls.sig);
        }
        Command::Verify { binary, signature } => {
            let mut downloader = Downloader::new(config)?;
            downloader
                .prepare()
                .context("trusted key is not available")?;
            let verified = downloader.verify(&DownloadedArtifacts { binary, signature })?;
            println!("{}  {}", verified.sha256(), verified.path().display());
        }
        Command::Probe { proxy } => {
            let mut downloader = Downloader::new(config)?;
            if !proxy_ready(&mut downloader, &proxy).await {
                println!("proxy at {proxy} is not available");
                return Ok(ExitCode::FAILURE);
            }
            println!("proxy at {proxy} is ready");
        }
        Command::Serve { listen } => {
            mirror::serve(listen, config.download_dir).await?;
        }
        Command::Status => {
            let lang = config.lang.clone();
            let downloader = Downloader::new(config)?;
            match downloader.install_state(&lang) {
                InstallState::NotInstalled => println!("not installed"),
                InstallState::Installing => println!("installing (interrupted extraction present)"),
                InstallState::Installed(path) => println!("installed at {}", path.display()),
            }
            for path in downloader.cached_artifacts(&lang) {
                println!("cached: {}", path.display());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Poll the HTTP probe, then fall back to checking whether the port is
/// bound at all.
async fn proxy_ready(downloader: &mut Downloader, proxy: &str) -> bool {
    let gate = ProxyGate::default();
    if downloader.wait_for_proxy(&gate, &HttpProbe::new(proxy)).await {
        return true;
    }
    let listening = ListenerProbe::new(proxy).probe().await;
    if listening {
        warn!("proxy: {proxy} is listening but did not answer the status probe");
    }
    listening
}
