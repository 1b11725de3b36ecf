//! Decides, per catalog item, whether the local store already holds it and
//! where a fetch should land.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::error::DownloadError;
use super::file::modified_epoch_secs;
use super::paths;
use crate::icloud::RemoteItem;

/// Where an item lives locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTarget {
    pub folder: PathBuf,
    pub path: PathBuf,
    pub provenance: DateTime<Utc>,
}

impl LocalTarget {
    pub fn expected_mtime(&self) -> i64 {
        self.provenance.timestamp()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The file at this path already represents the item.
    Skip(PathBuf),
    /// Download to `path` and stamp it with `mtime`.
    Fetch { path: PathBuf, mtime: i64 },
}

#[derive(Debug)]
pub struct PlacementResolver {
    root: PathBuf,
    added_date_ids: HashSet<String>,
}

impl PlacementResolver {
    pub fn new(root: impl Into<PathBuf>, added_date_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            root: root.into(),
            added_date_ids: added_date_ids.into_iter().collect(),
        }
    }

    /// Date that buckets the item: the added date for configured ids (their
    /// asset date cannot be extracted) and for items without an asset date,
    /// the asset date otherwise.
    pub fn provenance_date(&self, item: &RemoteItem) -> DateTime<Utc> {
        if self.added_date_ids.contains(&item.id) {
            return item.added_date;
        }
        item.asset_date.unwrap_or(item.added_date)
    }

    pub fn target(&self, item: &RemoteItem) -> LocalTarget {
        let provenance = self.provenance_date(item);
        let folder = paths::folder_for(&self.root, &provenance);
        let path = folder.join(paths::clean_filename(&item.filename));
        LocalTarget {
            folder,
            path,
            provenance,
        }
    }

    /// Create the item's folder if needed, then compare what is on disk.
    pub async fn resolve(&self, item: &RemoteItem) -> Result<Decision, DownloadError> {
        let target = self.target(item);
        tokio::fs::create_dir_all(&target.folder)
            .await
            .map_err(|e| DownloadError::disk(&target.folder, e))?;

        let mtime = target.expected_mtime();
        let meta = match tokio::fs::metadata(&target.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Decision::Fetch {
                    path: target.path,
                    mtime,
                });
            }
            Err(e) => return Err(DownloadError::disk(&target.path, e)),
        };

        // Without a catalog size only the stamp can identify our own file.
        let size_matches = match item.size {
            Some(size) => meta.len() == size,
            None => true,
        };
        if size_matches && modified_epoch_secs(&meta) == Some(mtime) {
            return Ok(Decision::Skip(target.path));
        }

        // Same name, different content: fall back to the time-of-day name.
        let alternate = target.folder.join(paths::alternate_filename(
            &paths::clean_filename(&item.filename),
            &target.provenance,
        ));
        if exists(&alternate).await? {
            tracing::debug!(
                "{} differs from item {}; alternate {} already present",
                target.path.display(),
                item.id,
                alternate.display()
            );
            return Ok(Decision::Skip(alternate));
        }
        Ok(Decision::Fetch {
            path: alternate,
            mtime,
        })
    }
}

async fn exists(path: &Path) -> Result<bool, DownloadError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| DownloadError::disk(path, e))
}
