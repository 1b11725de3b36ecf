use std::fs::{FileTimes, Metadata};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;
use crate::icloud::ContentStream;

/// Hidden sibling the content is streamed into before the rename. The
/// resolver never looks at it, so a crash mid-write leaves no file that
/// could pass the staleness check.
pub fn part_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.part"))
}

/// Stream `content` to `target` through its `.part` file, then stamp the
/// modification time, sync to disk and rename into place.
///
/// Without an `expected_size` the length is not checked. Returns the number
/// of bytes written. On any error the part file is removed and `target` is
/// left untouched.
pub async fn write_atomically(
    content: ContentStream,
    id: &str,
    target: &Path,
    expected_size: Option<u64>,
    mtime: i64,
) -> Result<u64, DownloadError> {
    let part = part_path(target);
    let result = write_part(content, id, target, &part, expected_size, mtime).await;
    match result {
        Ok(written) => {
            fs::rename(&part, target)
                .await
                .map_err(|e| DownloadError::disk(target, e))?;
            Ok(written)
        }
        Err(e) => {
            let _ = fs::remove_file(&part).await;
            Err(e)
        }
    }
}

async fn write_part(
    mut content: ContentStream,
    id: &str,
    target: &Path,
    part: &Path,
    expected_size: Option<u64>,
    mtime: i64,
) -> Result<u64, DownloadError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part)
        .await
        .map_err(|e| DownloadError::disk(part, e))?;

    let mut written: u64 = 0;
    while let Some(chunk) = content.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Fetch {
            id: id.to_string(),
            source,
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::disk(part, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| DownloadError::disk(part, e))?;

    if let Some(expected) = expected_size {
        if written != expected {
            return Err(DownloadError::Truncated {
                path: target.display().to_string(),
                expected,
                received: written,
            });
        }
    }

    let file = file.into_std().await;
    tokio::task::spawn_blocking(move || stamp_and_sync(&file, mtime))
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r)
        .map_err(|e| DownloadError::disk(part, e))?;

    Ok(written)
}

/// Stamp an open file and force its data and metadata to disk, so a rename
/// that survives a power loss never exposes a short or unstamped file.
fn stamp_and_sync(file: &std::fs::File, timestamp: i64) -> std::io::Result<()> {
    file.set_times(file_times(timestamp))?;
    file.sync_all()
}

fn file_times(timestamp: i64) -> FileTimes {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    FileTimes::new().set_modified(time).set_accessed(time)
}

/// Set the modification and access times of a file to the given Unix
/// timestamp. Negative timestamps (dates before 1970) are supported.
#[cfg(test)]
pub fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(file_times(timestamp))
}

/// Modification time in whole seconds since the epoch, negative before 1970.
pub fn modified_epoch_secs(meta: &Metadata) -> Option<i64> {
    let modified = meta.modified().ok()?;
    Some(match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    })
}
