// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The artifact store: extract, verify, commit.
//!
//! # Layout
//! ```text
//! <root>/
//!   .staging/<model_id>-<uuid>/   in-progress extractions
//!   <model_id>/                   committed installs
//! ```
//!
//! An install directory only ever appears through a `rename` from
//! staging, after every expected file has been verified. A crash or error
//! mid-extraction therefore leaves at most a staging directory behind,
//! which is never consulted and is cleared on the next start.

use crate::archive::{self, ArchiveKind};
use crate::artifacts::{self, ArtifactSet};
use crate::ArtifactError;
use model_catalog::ModelDescriptor;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Name of the staging directory under the store root.
pub const STAGING_DIR: &str = ".staging";

/// Extracts model archives into per-model install directories.
///
/// Safe to share across threads. Calls for the same model id are
/// serialized; calls for different ids run concurrently.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    extractions: AtomicU64,
}

impl ArtifactStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// Leftover staging directories from an earlier process are removed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| ArtifactError::io(&root, e))?;

        let staging = root.join(STAGING_DIR);
        if staging.exists() {
            tracing::debug!(path = %staging.display(), "clearing stale staging area");
            std::fs::remove_dir_all(&staging).map_err(|e| ArtifactError::io(&staging, e))?;
        }
        std::fs::create_dir_all(&staging).map_err(|e| ArtifactError::io(&staging, e))?;

        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
            extractions: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Install directory for `model_id`.
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(model_id)
    }

    /// Number of extractions committed by this store instance.
    pub fn extractions(&self) -> u64 {
        self.extractions.load(Ordering::Acquire)
    }

    /// Whether a complete, verified install exists. Never extracts.
    pub fn is_ready(&self, descriptor: &ModelDescriptor) -> bool {
        self.artifact_set(descriptor).is_some()
    }

    /// The verified install, if there is one. Never extracts.
    pub fn artifact_set(&self, descriptor: &ModelDescriptor) -> Option<ArtifactSet> {
        artifacts::verify(descriptor, &self.model_dir(&descriptor.model_id)).ok()
    }

    /// Makes sure the model's artifacts are installed and complete.
    ///
    /// Returns immediately if a verified install already exists. Otherwise
    /// unpacks `archive_ref` into staging, verifies it, and commits it by
    /// rename. On any failure the staging directory is discarded and
    /// whatever was installed before is left alone.
    pub fn ensure_ready(
        &self,
        descriptor: &ModelDescriptor,
        archive_ref: &Path,
    ) -> Result<ArtifactSet, ArtifactError> {
        let model_id = descriptor.model_id.as_str();
        let lock = self.lock_for(model_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let install_dir = self.model_dir(model_id);
        match artifacts::verify(descriptor, &install_dir) {
            Ok(set) => {
                tracing::debug!(model_id, "artifacts already installed");
                return Ok(set);
            }
            Err(reason) if install_dir.exists() => {
                tracing::warn!(model_id, %reason, "existing install is incomplete, re-extracting");
            }
            Err(_) => {}
        }

        if !archive_ref.exists() {
            return Err(ArtifactError::ArchiveNotFound {
                model_id: model_id.to_string(),
                path: archive_ref.display().to_string(),
            });
        }
        let kind = ArchiveKind::detect(archive_ref).ok_or_else(|| {
            ArtifactError::corrupt(
                model_id,
                format!("unsupported archive type: {}", archive_ref.display()),
            )
        })?;

        let staging = self.root.join(STAGING_DIR).join(format!(
            "{model_id}-{}",
            uuid::Uuid::new_v4().simple()
        ));
        tracing::info!(
            model_id,
            archive = %archive_ref.display(),
            ?kind,
            "extracting model artifacts"
        );

        let result = stage(descriptor, kind, archive_ref, &staging)
            .and_then(|content| commit(&content, &install_dir));
        discard(&staging);

        match result {
            Ok(()) => {
                self.extractions.fetch_add(1, Ordering::AcqRel);
                let set = artifacts::verify(descriptor, &install_dir)
                    .map_err(|reason| ArtifactError::corrupt(model_id, reason))?;
                tracing::info!(
                    model_id,
                    path = %install_dir.display(),
                    weight_bytes = set.weight_bytes_on_disk(),
                    "artifacts ready"
                );
                Ok(set)
            }
            Err(detail) => {
                tracing::warn!(model_id, %detail, "extraction failed, nothing committed");
                Err(ArtifactError::corrupt(model_id, detail))
            }
        }
    }

    /// Removes a model's install. Returns `false` if there was none.
    pub fn evict(&self, model_id: &str) -> Result<bool, ArtifactError> {
        let lock = self.lock_for(model_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let dir = self.model_dir(model_id);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(|e| ArtifactError::io(&dir, e))?;
        tracing::info!(model_id, "artifacts evicted");
        Ok(true)
    }

    fn lock_for(&self, model_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Unpacks into `staging` and returns the directory that holds the
/// verified files: `staging` itself, or its single top-level directory
/// when the archive wraps everything in one.
fn stage(
    descriptor: &ModelDescriptor,
    kind: ArchiveKind,
    archive_ref: &Path,
    staging: &Path,
) -> Result<PathBuf, String> {
    std::fs::create_dir_all(staging)
        .map_err(|e| format!("cannot create staging directory: {e}"))?;
    archive::unpack(kind, archive_ref, staging).map_err(|e| format!("extraction failed: {e}"))?;

    match artifacts::verify(descriptor, staging) {
        Ok(_) => Ok(staging.to_path_buf()),
        Err(reason) => match single_subdir(staging) {
            Some(inner) if artifacts::verify(descriptor, &inner).is_ok() => Ok(inner),
            _ => Err(reason),
        },
    }
}

/// Moves verified content into place. An invalid leftover install is
/// removed only now, right before the rename.
fn commit(content: &Path, install_dir: &Path) -> Result<(), String> {
    if install_dir.exists() {
        std::fs::remove_dir_all(install_dir)
            .map_err(|e| format!("cannot replace incomplete install: {e}"))?;
    }
    std::fs::rename(content, install_dir).map_err(|e| format!("commit rename failed: {e}"))
}

fn discard(staging: &Path) {
    if staging.exists() {
        if let Err(e) = std::fs::remove_dir_all(staging) {
            tracing::warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
        }
    }
}

fn single_subdir(dir: &Path) -> Option<PathBuf> {
    let mut entries = std::fs::read_dir(dir).ok()?.filter_map(Result::ok);
    let first = entries.next()?;
    if entries.next().is_some() || !first.file_type().ok()?.is_dir() {
        return None;
    }
    Some(first.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_catalog::ModelCatalog;

    const MANIFEST: &str = r#"{
        "model_list": [{
            "model_id": "tiny",
            "archive": "{model_id}.tar.gz",
            "quantization": "f32",
            "context_window": 64,
            "parameter_count": 256,
            "num_layers": 1,
            "hidden_size": 16,
            "files": {
                "weights": ["model.safetensors"],
                "tokenizer": "tokenizer.json",
                "config": "config.json"
            }
        }]
    }"#;

    fn descriptor() -> ModelDescriptor {
        ModelCatalog::from_json(MANIFEST)
            .unwrap()
            .resolve("tiny")
            .unwrap()
            .clone()
    }

    /// Incompressible filler so that truncating the gzip stream cuts into
    /// file data rather than just the trailer.
    fn noise(len: usize) -> Vec<u8> {
        let mut x: u32 = 0x9e37_79b9;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                (x & 0xff) as u8
            })
            .collect()
    }

    fn files() -> Vec<(&'static str, Vec<u8>)> {
        vec![
            ("model.safetensors", noise(64 * 1024)),
            ("tokenizer.json", br#"{"vocab":["a"],"eos_token_id":0}"#.to_vec()),
            ("config.json", b"{}".to_vec()),
        ]
    }

    fn write_tar_gz(path: &Path, prefix: &str, entries: &[(&str, Vec<u8>)]) {
        let file = std::fs::File::create(path).unwrap();
        let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(enc);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{prefix}{name}"), data.as_slice())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn staging_is_empty(store: &ArtifactStore) -> bool {
        std::fs::read_dir(store.root().join(STAGING_DIR))
            .unwrap()
            .next()
            .is_none()
    }

    #[test]
    fn test_ensure_ready_extracts_once() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tiny.tar.gz");
        write_tar_gz(&archive, "", &files());
        let store = ArtifactStore::new(tmp.path().join("store")).unwrap();
        let d = descriptor();

        assert!(!store.is_ready(&d));
        let first = store.ensure_ready(&d, &archive).unwrap();
        let second = store.ensure_ready(&d, &archive).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.extractions(), 1);
        assert!(store.is_ready(&d));
        assert_eq!(first.weight_shards().len(), 1);
        assert_eq!(first.root(), store.model_dir("tiny"));
        assert!(staging_is_empty(&store));
    }

    #[test]
    fn test_truncated_archive_never_ready_then_recovers() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("tiny.tar.gz");
        write_tar_gz(&good, "", &files());
        let bytes = std::fs::read(&good).unwrap();
        let bad = tmp.path().join("tiny-truncated.tar.gz");
        std::fs::write(&bad, &bytes[..bytes.len() / 2]).unwrap();

        let store = ArtifactStore::new(tmp.path().join("store")).unwrap();
        let d = descriptor();

        let err = store.ensure_ready(&d, &bad).unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
        assert!(!store.is_ready(&d));
        assert!(!store.model_dir("tiny").exists());
        assert!(staging_is_empty(&store));
        assert_eq!(store.extractions(), 0);

        store.ensure_ready(&d, &good).unwrap();
        assert!(store.is_ready(&d));
        assert_eq!(store.extractions(), 1);
    }

    #[test]
    fn test_missing_file_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tiny.tar.gz");
        let mut partial = files();
        partial.retain(|(name, _)| *name != "config.json");
        write_tar_gz(&archive, "", &partial);

        let store = ArtifactStore::new(tmp.path().join("store")).unwrap();
        let err = store.ensure_ready(&descriptor(), &archive).unwrap_err();
        match err {
            ArtifactError::Corrupt { detail, .. } => assert!(detail.contains("config.json")),
            other => panic!("expected Corrupt, got {other:?}"),
        }
        assert!(staging_is_empty(&store));
    }

    #[test]
    fn test_empty_file_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tiny.tar.gz");
        let mut entries = files();
        entries[2].1.clear();
        write_tar_gz(&archive, "", &entries);

        let store = ArtifactStore::new(tmp.path().join("store")).unwrap();
        assert!(matches!(
            store.ensure_ready(&descriptor(), &archive),
            Err(ArtifactError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_wrapped_archive_is_unwrapped() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tiny.tar.gz");
        write_tar_gz(&archive, "tiny/", &files());

        let store = ArtifactStore::new(tmp.path().join("store")).unwrap();
        let set = store.ensure_ready(&descriptor(), &archive).unwrap();
        assert!(set.tokenizer().ends_with("tiny/tokenizer.json"));
        assert!(store.model_dir("tiny").join("config.json").is_file());
    }

    #[test]
    fn test_directory_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("assets");
        std::fs::create_dir_all(&src).unwrap();
        for (name, data) in files() {
            std::fs::write(src.join(name), data).unwrap();
        }

        let store = ArtifactStore::new(tmp.path().join("store")).unwrap();
        store.ensure_ready(&descriptor(), &src).unwrap();
        assert!(store.is_ready(&descriptor()));
    }

    #[test]
    fn test_incomplete_install_replaced_on_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tiny.tar.gz");
        write_tar_gz(&archive, "", &files());

        let store = ArtifactStore::new(tmp.path().join("store")).unwrap();
        let leftover = store.model_dir("tiny");
        std::fs::create_dir_all(&leftover).unwrap();
        std::fs::write(leftover.join("stale.bin"), b"x").unwrap();

        store.ensure_ready(&descriptor(), &archive).unwrap();
        assert!(!leftover.join("stale.bin").exists());
        assert!(store.is_ready(&descriptor()));
    }

    #[test]
    fn test_missing_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path().join("store")).unwrap();
        assert!(matches!(
            store.ensure_ready(&descriptor(), &tmp.path().join("nope.tar.gz")),
            Err(ArtifactError::ArchiveNotFound { .. })
        ));
    }

    #[test]
    fn test_unsupported_archive_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = tmp.path().join("tiny.zip");
        std::fs::write(&zip, b"PK").unwrap();
        let store = ArtifactStore::new(tmp.path().join("store")).unwrap();
        assert!(matches!(
            store.ensure_ready(&descriptor(), &zip),
            Err(ArtifactError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_evict() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tiny.tar.gz");
        write_tar_gz(&archive, "", &files());
        let store = ArtifactStore::new(tmp.path().join("store")).unwrap();

        assert!(!store.evict("tiny").unwrap());
        store.ensure_ready(&descriptor(), &archive).unwrap();
        assert!(store.evict("tiny").unwrap());
        assert!(!store.is_ready(&descriptor()));
    }

    #[test]
    fn test_concurrent_same_id_extracts_once() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tiny.tar.gz");
        write_tar_gz(&archive, "", &files());
        let store = Arc::new(ArtifactStore::new(tmp.path().join("store")).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let archive = archive.clone();
                std::thread::spawn(move || store.ensure_ready(&descriptor(), &archive).is_ok())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(store.extractions(), 1);
    }

    #[test]
    fn test_new_clears_stale_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("store");
        std::fs::create_dir_all(root.join(STAGING_DIR).join("tiny-dead")).unwrap();
        let store = ArtifactStore::new(&root).unwrap();
        assert!(staging_is_empty(&store));
    }
}
