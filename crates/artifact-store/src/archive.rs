// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Archive unpacking.
//!
//! Supported sources:
//! - gzip-compressed tar (`.tar.gz`, `.tgz`)
//! - plain tar (`.tar`)
//! - a directory, copied recursively (bundled assets)

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Kind of artifact source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Tar,
    Directory,
}

impl ArchiveKind {
    /// Detects the kind from the filesystem entry and file name.
    pub fn detect(path: &Path) -> Option<Self> {
        if path.is_dir() {
            return Some(Self::Directory);
        }
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Unpacks `source` into the existing directory `dest`.
///
/// `tar` refuses entries that would land outside `dest` (absolute paths,
/// `..` components), so a hostile archive cannot write elsewhere.
pub(crate) fn unpack(kind: ArchiveKind, source: &Path, dest: &Path) -> io::Result<()> {
    match kind {
        ArchiveKind::TarGz => {
            let reader = BufReader::new(File::open(source)?);
            let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(reader));
            archive.set_preserve_permissions(false);
            archive.unpack(dest)
        }
        ArchiveKind::Tar => {
            let reader = BufReader::new(File::open(source)?);
            let mut archive = tar::Archive::new(reader);
            archive.set_preserve_permissions(false);
            archive.unpack(dest)
        }
        ArchiveKind::Directory => copy_dir(source, dest),
    }
}

fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            copy_dir(&entry.path(), &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_name() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ArchiveKind::detect(dir.path()), Some(ArchiveKind::Directory));
        assert_eq!(
            ArchiveKind::detect(Path::new("/x/model.tar.gz")),
            Some(ArchiveKind::TarGz)
        );
        assert_eq!(ArchiveKind::detect(Path::new("/x/M.TGZ")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect(Path::new("/x/model.tar")), Some(ArchiveKind::Tar));
        assert_eq!(ArchiveKind::detect(Path::new("/x/model.zip")), None);
    }

    #[test]
    fn test_copy_dir_nested() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("a.bin"), b"abc").unwrap();
        std::fs::write(src.path().join("sub/b.bin"), b"de").unwrap();

        let dst = tempfile::tempdir().unwrap();
        unpack(ArchiveKind::Directory, src.path(), dst.path()).unwrap();
        assert_eq!(std::fs::read(dst.path().join("a.bin")).unwrap(), b"abc");
        assert_eq!(std::fs::read(dst.path().join("sub/b.bin")).unwrap(), b"de");
    }
}
