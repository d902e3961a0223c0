use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Windows,
    MacOs,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X64,
    X86,
    Unknown,
}

impl Os {
    pub fn detect() -> Self {
        if cfg!(target_os = "windows") {
            Os::Windows
        } else if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(target_os = "linux") {
            Os::Linux
        } else {
            Os::Unknown
        }
    }

    /// Manifest spelling of the operating system.
    pub const fn key(self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Windows => "win",
            Os::MacOs => "osx",
            Os::Unknown => "unknown",
        }
    }
}

impl Arch {
    pub fn detect() -> Self {
        if cfg!(target_arch = "x86_64") {
            Arch::X64
        } else if cfg!(target_arch = "x86") {
            Arch::X86
        } else {
            Arch::Unknown
        }
    }

    pub const fn key(self) -> &'static str {
        match self {
            Arch::X64 => "64",
            Arch::X86 => "32",
            Arch::Unknown => "unknown",
        }
    }
}

impl FromStr for Os {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(Os::Linux),
            "win" | "windows" => Ok(Os::Windows),
            "osx" | "macos" | "darwin" => Ok(Os::MacOs),
            "unknown" => Ok(Os::Unknown),
            other => Err(format!("unrecognised operating system '{other}'")),
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "64" | "x86_64" | "amd64" => Ok(Arch::X64),
            "32" | "x86" | "386" | "i686" => Ok(Arch::X86),
            "unknown" => Ok(Arch::Unknown),
            other => Err(format!("unrecognised architecture '{other}'")),
        }
    }
}

/// Target platform, fixed for the lifetime of a downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    pub fn detect() -> Self {
        Self::new(Os::detect(), Arch::detect())
    }

    /// Key under `downloads` in the update manifest. macOS bundles are
    /// universal, so the architecture is left out there.
    pub fn manifest_key(&self) -> String {
        match self.os {
            Os::MacOs => self.os.key().to_owned(),
            _ => format!("{}{}", self.os.key(), self.arch.key()),
        }
    }

    /// File name used for the downloaded bundle of `lang`.
    pub fn artifact_name(&self, lang: &str) -> String {
        let (prefix, extension) = match self.os {
            Os::MacOs => ("torbrowser", "dmg"),
            Os::Windows => ("torbrowser-installer", "exe"),
            _ => ("torbrowser", "tar.xz"),
        };
        format!("{prefix}-{}-{lang}.{extension}", self.manifest_key())
    }

    pub fn signature_name(&self, lang: &str) -> String {
        format!("{}.asc", self.artifact_name(lang))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.manifest_key())
    }
}
