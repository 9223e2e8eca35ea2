use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Bytes;
use chrono::Utc;
use futures::Stream;
use tokio::fs::File;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::warn;

pub const MAX_TEMP_AGE: Duration = Duration::from_secs(60 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Path for a fresh media temp file. Timestamp collisions between requests
/// started in the same millisecond are an accepted risk.
pub fn media_path(dir: &Path, ext: &str) -> PathBuf {
    dir.join(format!("temp_{}.{ext}", Utc::now().timestamp_millis()))
}

/// Short-lived cookie file handed to the media tool. Removed on drop.
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    pub async fn create(dir: &Path, contents: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("cookies_{}.txt", Utc::now().timestamp_millis()));
        tokio::fs::write(&path, contents).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CookieFile {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}

/// Owns a media temp path and deletes it on drop, so every handler exit path
/// (bridge failure, open failure, stream close) cleans up.
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}

fn remove_quietly(path: &Path) {
    if let Err(error) = std::fs::remove_file(path)
        && error.kind() != ErrorKind::NotFound
    {
        warn!("Could not remove temp file {:?}: {error}", path);
    }
}

/// File stream that carries its guard, deleting the temp file once the
/// response body is fully sent, aborted, or errors.
pub struct GuardedFileStream {
    inner: ReaderStream<File>,
    _guard: TempFileGuard,
}

impl GuardedFileStream {
    pub fn new(file: File, guard: TempFileGuard) -> Self {
        Self {
            inner: ReaderStream::new(file),
            _guard: guard,
        }
    }
}

impl Stream for GuardedFileStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// Safety net for files leaked by crashed handlers: deletes regular files in
/// the temp dir older than `max_age`. Already-deleted entries are not errors.
pub async fn sweep_once(dir: &Path, max_age: Duration) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open temp dir for sweep: {error}");
            }
            return;
        }
    };

    let now = std::time::SystemTime::now();

    loop {
        let maybe_entry = match entries.next_entry().await {
            Ok(value) => value,
            Err(error) => {
                warn!("Could not iterate temp dir for sweep: {error}");
                break;
            }
        };

        let Some(entry) = maybe_entry else {
            break;
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };

        if !metadata.is_file() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);

        if age < max_age {
            continue;
        }

        if let Err(error) = tokio::fs::remove_file(&path).await
            && error.kind() != ErrorKind::NotFound
        {
            warn!("Could not sweep temp file {:?}: {error}", path);
        }
    }
}

pub fn spawn_sweeper(dir: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            sweep_once(&dir, MAX_TEMP_AGE).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;

    #[test]
    fn media_path_uses_prefix_and_extension() {
        let path = media_path(Path::new("/tmp/x"), "mp3");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("temp_"));
        assert!(name.ends_with(".mp3"));
    }

    #[tokio::test]
    async fn cookie_file_is_written_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let cookies = CookieFile::create(dir.path(), "session=abc")
                .await
                .unwrap();
            assert_eq!(
                tokio::fs::read_to_string(cookies.path()).await.unwrap(),
                "session=abc"
            );
            cookies.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn guard_removes_file_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp_1.mp4");
        tokio::fs::write(&path, b"bytes").await.unwrap();

        drop(TempFileGuard::new(path.clone()));
        assert!(!path.exists());
    }

    #[test]
    fn guard_tolerates_already_deleted_file() {
        drop(TempFileGuard::new(PathBuf::from("/nonexistent/temp_0.mp4")));
    }

    #[tokio::test]
    async fn sweep_removes_old_files_and_keeps_fresh_ones() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("temp_1.mp4");
        let fresh = dir.path().join("temp_2.mp4");
        tokio::fs::write(&old, b"old").await.unwrap();
        tokio::fs::write(&fresh, b"fresh").await.unwrap();

        let two_hours_ago = FileTime::from_unix_time(FileTime::now().unix_seconds() - 7200, 0);
        filetime::set_file_mtime(&old, two_hours_ago).unwrap();

        sweep_once(dir.path(), MAX_TEMP_AGE).await;

        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn sweep_on_missing_dir_is_a_no_op() {
        sweep_once(Path::new("/nonexistent/temp-dir"), MAX_TEMP_AGE).await;
    }
}
