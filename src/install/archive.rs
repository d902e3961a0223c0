use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use log::{debug, warn};
use tar::{Archive, EntryType};
use xz2::read::XzDecoder;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Xz,
    Gzip,
    None,
}

impl Compression {
    /// Guess from the file name; Linux bundles are published as `.tar.xz`.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Compression::Gzip
        } else if name.ends_with(".tar") {
            Compression::None
        } else {
            Compression::Xz
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    pub skipped_links: usize,
}

/// Single forward pass over a compressed tar stream into `dest`.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<ExtractSummary> {
    let file = fs::File::open(archive_path)
        .map_err(|e| Error::install(format!("open {}: {e}", archive_path.display())))?;
    let reader = BufReader::new(file);
    match Compression::from_path(archive_path) {
        Compression::Xz => extract_from(XzDecoder::new(reader), dest),
        Compression::Gzip => extract_from(GzDecoder::new(reader), dest),
        Compression::None => extract_from(reader, dest),
    }
}

pub fn extract_from<R: Read>(reader: R, dest: &Path) -> Result<ExtractSummary> {
    fs::create_dir_all(dest).map_err(|e| Error::install(format!("create {}: {e}", dest.display())))?;
    let mut archive = Archive::new(reader);
    let mut summary = ExtractSummary::default();

    let entries = archive
        .entries()
        .map_err(|e| Error::install(format!("archive read error: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::install(format!("archive entry error: {e}")))?;
        let raw_path = entry
            .path()
            .map_err(|e| Error::install(format!("archive path error: {e}")))?
            .into_owned();
        let Some(relative) = confine(&raw_path)? else {
            continue;
        };
        let target = dest.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(|e| write_error(&target, e))?;
                summary.directories += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
                }
                let mut out = fs::File::create(&target).map_err(|e| write_error(&target, e))?;
                io::copy(&mut entry, &mut out).map_err(|e| write_error(&target, e))?;
                drop(out);
                // File::create uses a fixed default mode; restore the recorded one.
                if let Ok(mode) = entry.header().mode() {
                    apply_mode(&target, mode)?;
                }
                summary.files += 1;
            }
            EntryType::Symlink | EntryType::Link => {
                warn!("install: skipping link entry {}", raw_path.display());
                summary.skipped_links += 1;
            }
            other => debug!("install: ignoring {other:?} entry {}", raw_path.display()),
        }
    }

    Ok(summary)
}

/// Relative form of an entry path, or an error if it could leave the root.
fn confine(path: &Path) -> Result<Option<PathBuf>> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::install(format!(
                    "archive entry {} escapes the install directory",
                    path.display()
                )));
            }
        }
    }
    Ok((!relative.as_os_str().is_empty()).then_some(relative))
}

fn write_error(path: &Path, err: io::Error) -> Error {
    Error::install(format!("write {}: {err}", path.display()))
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| write_error(path, e))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Write;

    use tar::{Builder, EntryType, Header};
    use xz2::write::XzEncoder;

    pub enum Item<'a> {
        Dir(&'a str),
        File(&'a str, &'a [u8], u32),
        Symlink(&'a str, &'a str),
        RawPath(&'a [u8]),
    }

    /// Build an in-memory `.tar.xz` from `items`.
    pub fn tar_xz(items: &[Item<'_>]) -> Vec<u8> {
        let mut builder = Builder::new(XzEncoder::new(Vec::new(), 6));
        for item in items {
            let mut header = Header::new_gnu();
            match item {
                Item::Dir(path) => {
                    header.set_entry_type(EntryType::Directory);
                    header.set_path(path).unwrap();
                    header.set_mode(0o755);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append(&header, std::io::empty()).unwrap();
                }
                Item::File(path, data, mode) => {
                    header.set_entry_type(EntryType::Regular);
                    header.set_path(path).unwrap();
                    header.set_mode(*mode);
                    header.set_size(data.len() as u64);
                    header.set_cksum();
                    builder.append(&header, *data).unwrap();
                }
                Item::Symlink(path, target) => {
                    header.set_entry_type(EntryType::Symlink);
                    header.set_path(path).unwrap();
                    header.set_link_name(target).unwrap();
                    header.set_mode(0o777);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append(&header, std::io::empty()).unwrap();
                }
                Item::RawPath(name) => {
                    header.set_entry_type(EntryType::Regular);
                    header.as_old_mut().name[..name.len()].copy_from_slice(name);
                    header.set_mode(0o644);
                    header.set_size(1);
                    header.set_cksum();
                    builder.append(&header, &b"x"[..]).unwrap();
                }
            }
        }
        let mut encoder = builder.into_inner().unwrap();
        encoder.flush().unwrap();
        encoder.finish().unwrap()
    }
}
