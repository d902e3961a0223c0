use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use log::{debug, info, warn};

use crate::env;
use crate::error::{Error, Result};
use crate::platform::{Os, Platform};
use crate::util;
use crate::verify::VerifiedArtifact;

pub mod archive;

/// Runs installer helpers. Arguments are always passed as separate argv
/// elements, never through a shell.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[OsString]) -> io::Result<ExitStatus>;
}

/// Runs the child with stdout/stderr attached to ours and waits for it.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> io::Result<ExitStatus> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallState {
    NotInstalled,
    /// A previous extraction stopped part way; its staging directory remains.
    Installing,
    Installed(PathBuf),
}

pub struct Installer<R = SystemRunner> {
    platform: Platform,
    unpack_dir: PathBuf,
    runner: R,
}

impl Installer<SystemRunner> {
    pub fn new(platform: Platform, unpack_dir: impl Into<PathBuf>) -> Self {
        Self::with_runner(platform, unpack_dir, SystemRunner)
    }
}

impl<R: CommandRunner> Installer<R> {
    pub fn with_runner(platform: Platform, unpack_dir: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            platform,
            unpack_dir: unpack_dir.into(),
            runner,
        }
    }

    pub fn browser_dir(&self, lang: &str) -> PathBuf {
        env::browser_dir(&self.unpack_dir, lang)
    }

    fn staging_dir(&self, lang: &str) -> PathBuf {
        self.unpack_dir.join(format!(".staging-{lang}"))
    }

    pub fn state(&self, lang: &str) -> InstallState {
        let browser_dir = self.browser_dir(lang);
        if util::exists(&browser_dir) {
            InstallState::Installed(browser_dir)
        } else if util::exists(&self.staging_dir(lang)) {
            InstallState::Installing
        } else {
            InstallState::NotInstalled
        }
    }

    /// Install a verified bundle and return the directory it lives in.
    pub fn install(&self, artifact: &VerifiedArtifact, lang: &str) -> Result<PathBuf> {
        info!("install: unpacking {}", artifact.path().display());
        match self.platform.os {
            Os::Windows => self.run_silent_installer(artifact.path(), lang),
            Os::MacOs => self.open_disk_image(artifact.path()),
            Os::Linux | Os::Unknown => self.unpack_archive(artifact.path(), lang),
        }
    }

    fn run_silent_installer(&self, binary: &Path, lang: &str) -> Result<PathBuf> {
        let install_dir = self.browser_dir(lang);
        if util::exists(&install_dir) {
            debug!("install: {} already present", install_dir.display());
            return Ok(install_dir);
        }

        let mut destination = OsString::from("/D=");
        destination.push(install_dir.as_os_str());
        let args = [OsString::from("/S"), destination];
        info!("install: running silent installer into {}", install_dir.display());
        self.run_checked(binary, &args)?;
        Ok(install_dir)
    }

    fn open_disk_image(&self, image: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.unpack_dir).map_err(|e| Error::io(&self.unpack_dir, e))?;
        let args = [
            OsString::from("-W"),
            OsString::from("-n"),
            image.as_os_str().to_owned(),
        ];
        info!("install: mounting disk image {}", image.display());
        self.run_checked(Path::new("open"), &args)?;
        Ok(self.unpack_dir.clone())
    }

    fn unpack_archive(&self, archive_path: &Path, lang: &str) -> Result<PathBuf> {
        let install_dir = self.browser_dir(lang);
        if util::exists(&install_dir) {
            debug!("install: {} already present", install_dir.display());
            return Ok(install_dir);
        }

        let staging = self.staging_dir(lang);
        clean_staging_directory(&staging)?;
        let summary = archive::extract(archive_path, &staging)?;
        info!(
            "install: extracted {} files, {} directories ({} links skipped)",
            summary.files, summary.directories, summary.skipped_links
        );

        promote_staging(&staging, &install_dir)?;
        info!("install: ready at {}", install_dir.display());
        Ok(install_dir)
    }

    fn run_checked(&self, program: &Path, args: &[OsString]) -> Result<()> {
        debug!("install: exec {} {:?}", program.display(), args);
        let status = self
            .runner
            .run(program, args)
            .map_err(|e| Error::install(format!("failed to start {}: {e}", program.display())))?;
        if !status.success() {
            return Err(Error::install(format!(
                "{} exited with {status}",
                program.display()
            )));
        }
        Ok(())
    }
}

/// Move the extracted tree into place. An archive with a single top-level
/// directory becomes the bundle directory itself.
fn promote_staging(staging: &Path, install_dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(staging)
        .map_err(|e| Error::install(format!("read {}: {e}", staging.display())))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| Error::install(format!("read {}: {e}", staging.display())))?;

    let single_dir = if entries.len() == 1
        && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false)
    {
        entries.pop()
    } else {
        None
    };

    match single_dir {
        Some(root) => {
            fs::rename(root.path(), install_dir)
                .map_err(|e| Error::install(format!("move into {}: {e}", install_dir.display())))?;
            fs::remove_dir(staging)
                .map_err(|e| Error::install(format!("remove {}: {e}", staging.display())))?;
        }
        None => fs::rename(staging, install_dir)
            .map_err(|e| Error::install(format!("move into {}: {e}", install_dir.display())))?,
    }
    Ok(())
}

fn clean_staging_directory(staging: &Path) -> Result<()> {
    if !util::exists(staging) {
        return Ok(());
    }
    warn!("install: removing leftover {}", staging.display());
    fs::remove_dir_all(staging)
        .or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                for entry in walkdir::WalkDir::new(staging).into_iter().flatten() {
                    if entry.file_type().is_file() {
                        let _ = fs::remove_file(entry.path());
                    }
                }
            }
            fs::remove_dir_all(staging)
        })
        .map_err(|e| Error::install(format!("failed to clean staging dir: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::archive::testing::{Item, tar_xz};
    use super::*;
    use crate::platform::Arch;

    type Invocation = (PathBuf, Vec<OsString>);

    /// Records invocations; optionally creates a directory to mimic an installer.
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Invocation>>,
        creates: Option<PathBuf>,
        exit_code: i32,
    }

    impl RecordingRunner {
        fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(windows)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::windows::process::ExitStatusExt;
        ExitStatus::from_raw(code as u32)
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &Path, args: &[OsString]) -> io::Result<ExitStatus> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_path_buf(), args.to_vec()));
            if let Some(dir) = &self.creates {
                fs::create_dir_all(dir)?;
            }
            Ok(exit_status(self.exit_code))
        }
    }

    fn verified(path: &Path) -> VerifiedArtifact {
        VerifiedArtifact::assume_verified(path)
    }

    #[test]
    fn windows_install_is_silent_and_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let unpack = root.path().join("unpack");
        let expected_dir = unpack.join("tor-browser_en-US");
        let runner = RecordingRunner {
            creates: Some(expected_dir.clone()),
            ..Default::default()
        };
        let installer =
            Installer::with_runner(Platform::new(Os::Windows, Arch::X64), &unpack, runner);
        let binary = root.path().join("torbrowser-installer-win64-en-US.exe");

        let first = installer.install(&verified(&binary), "en-US").unwrap();
        let second = installer.install(&verified(&binary), "en-US").unwrap();

        assert_eq!(first, expected_dir);
        assert_eq!(second, first);
        let calls = installer.runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, binary);
        let mut destination = OsString::from("/D=");
        destination.push(expected_dir.as_os_str());
        assert_eq!(calls[0].1, vec![OsString::from("/S"), destination]);
    }

    #[test]
    fn failing_installer_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let runner = RecordingRunner {
            exit_code: 2,
            ..Default::default()
        };
        let installer = Installer::with_runner(
            Platform::new(Os::Windows, Arch::X86),
            root.path().join("unpack"),
            runner,
        );

        let err = installer
            .install(&verified(&root.path().join("setup.exe")), "de")
            .unwrap_err();

        assert!(matches!(err, Error::InstallFailed { .. }));
        assert_eq!(installer.state("de"), InstallState::NotInstalled);
    }

    #[test]
    fn macos_opens_image_and_returns_unpack_dir() {
        let root = tempfile::tempdir().unwrap();
        let unpack = root.path().join("unpack");
        let installer = Installer::with_runner(
            Platform::new(Os::MacOs, Arch::X64),
            &unpack,
            RecordingRunner::default(),
        );
        let image = root.path().join("torbrowser-osx-en-US.dmg");

        let dir = installer.install(&verified(&image), "en-US").unwrap();

        assert_eq!(dir, unpack);
        let calls = installer.runner.calls();
        assert_eq!(calls[0].0, Path::new("open"));
        assert_eq!(
            calls[0].1,
            vec![
                OsString::from("-W"),
                OsString::from("-n"),
                image.into_os_string()
            ]
        );
    }

    #[test]
    fn archive_install_extracts_once() {
        let root = tempfile::tempdir().unwrap();
        let unpack = root.path().join("unpack");
        let archive = root.path().join("torbrowser-linux64-en-US.tar.xz");
        fs::write(
            &archive,
            tar_xz(&[
                Item::Dir("tor-browser/"),
                Item::File("tor-browser/start-tor-browser.desktop", b"[Desktop Entry]", 0o755),
            ]),
        )
        .unwrap();
        let installer = Installer::with_runner(
            Platform::new(Os::Linux, Arch::X64),
            &unpack,
            RecordingRunner::default(),
        );
        assert_eq!(installer.state("en-US"), InstallState::NotInstalled);

        let dir = installer.install(&verified(&archive), "en-US").unwrap();
        assert_eq!(dir, unpack.join("tor-browser_en-US"));
        assert!(dir.join("start-tor-browser.desktop").is_file());
        assert!(!unpack.join(".staging-en-US").exists());

        // Second run must not touch the archive at all.
        fs::remove_file(&archive).unwrap();
        let again = installer.install(&verified(&archive), "en-US").unwrap();
        assert_eq!(again, dir);
        assert_eq!(installer.state("en-US"), InstallState::Installed(dir));
        assert!(installer.runner.calls().is_empty());
    }

    #[test]
    fn flat_archive_becomes_bundle_dir() {
        let root = tempfile::tempdir().unwrap();
        let unpack = root.path().join("unpack");
        let archive = root.path().join("bundle.tar.xz");
        fs::write(
            &archive,
            tar_xz(&[
                Item::File("a.txt", b"a", 0o644),
                Item::File("b.txt", b"b", 0o644),
            ]),
        )
        .unwrap();
        let installer = Installer::new(Platform::new(Os::Unknown, Arch::Unknown), &unpack);

        let dir = installer.install(&verified(&archive), "fr").unwrap();

        assert!(dir.join("a.txt").is_file());
        assert!(dir.join("b.txt").is_file());
    }

    #[test]
    fn interrupted_extraction_leaves_installing_state() {
        let root = tempfile::tempdir().unwrap();
        let unpack = root.path().join("unpack");
        let archive = root.path().join("bundle.tar.xz");
        fs::write(&archive, b"truncated").unwrap();
        let installer = Installer::new(Platform::new(Os::Linux, Arch::X64), &unpack);

        assert!(installer.install(&verified(&archive), "en-US").is_err());
        assert_eq!(installer.state("en-US"), InstallState::Installing);

        fs::write(
            &archive,
            tar_xz(&[Item::Dir("tor-browser/"), Item::File("tor-browser/x", b"x", 0o644)]),
        )
        .unwrap();
        let dir = installer.install(&verified(&archive), "en-US").unwrap();
        assert!(dir.join("x").is_file());
        assert_eq!(installer.state("en-US"), InstallState::Installed(dir));
    }
}
