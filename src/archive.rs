//! Populating a freshly mounted volume from a remote archive.
//!
//! Extraction runs as a background task so mounting can return while large
//! archives download. The task shares the filesystem when it finishes.

use std::ffi::OsString;
use std::io::{self, Write};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::backend::BackendFuture;
use crate::command::{CommandRunner, run_checked};
use crate::filesystem::{Filesystem, ServiceState};
use crate::hostfs;

/// Remote archive used to populate a volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ArchiveDescriptor {
    /// Download location of a gzipped tarball.
    pub url: String,
    /// Expected MD5 digest of the download, as lowercase hex.
    pub checksum: String,
    /// Path whose existence means the archive was already extracted, for
    /// example after a node reboot. When unset, a non-empty mount point is
    /// taken as already populated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<Utf8PathBuf>,
}

/// Errors raised while populating a volume from an archive.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArchiveError {
    /// Raised when the download fails.
    #[error("failed to download {url}: {message}")]
    Download {
        /// Archive URL.
        url: String,
        /// Transport or HTTP status error.
        message: String,
    },
    /// Raised when the downloaded bytes do not match the descriptor.
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    Checksum {
        /// Archive URL.
        url: String,
        /// Digest from the descriptor.
        expected: String,
        /// Digest of the downloaded bytes.
        actual: String,
    },
    /// Raised when the archive cannot be staged or unpacked.
    #[error("failed to unpack {url} into {target}: {message}")]
    Unpack {
        /// Archive URL.
        url: String,
        /// Extraction target.
        target: Utf8PathBuf,
        /// Failure description.
        message: String,
    },
    /// Raised when the extraction task was aborted or panicked.
    #[error("extraction task did not complete: {0}")]
    Interrupted(String),
}

/// Downloads and unpacks archives.
pub trait ArchiveExtractor: Send + Sync {
    /// Extracts `archive` into `target`.
    fn extract<'a>(
        &'a self,
        archive: &'a ArchiveDescriptor,
        target: &'a Utf8Path,
    ) -> BackendFuture<'a, (), ArchiveError>;
}

/// Handle to a background extraction.
#[derive(Debug)]
pub struct ExtractionTask {
    handle: JoinHandle<Result<(), ArchiveError>>,
}

impl ExtractionTask {
    /// Starts extracting `archive` into `target`. On success the filesystem
    /// is shared; on failure it is marked [`ServiceState::Error`].
    pub(crate) fn spawn(
        extractor: Arc<dyn ArchiveExtractor>,
        archive: ArchiveDescriptor,
        target: Utf8PathBuf,
        filesystem: Arc<dyn Filesystem>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            info!(url = %archive.url, %target, filesystem = filesystem.name(), "extracting archive");
            match extractor.extract(&archive, &target).await {
                Ok(()) => {
                    info!(url = %archive.url, %target, "archive extracted");
                    filesystem.nfs_share_and_set_state();
                    Ok(())
                }
                Err(err) => {
                    error!(url = %archive.url, %target, error = %err, "archive extraction failed");
                    filesystem.set_state(ServiceState::Error);
                    Err(err)
                }
            }
        });
        Self { handle }
    }

    /// Cancels the extraction. The filesystem keeps its current state.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Returns `true` once the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the extraction to finish.
    ///
    /// # Errors
    ///
    /// Returns the extraction error, or [`ArchiveError::Interrupted`] when
    /// the task was aborted or panicked.
    pub async fn wait(self) -> Result<(), ArchiveError> {
        self.handle
            .await
            .map_err(|err| ArchiveError::Interrupted(err.to_string()))?
    }
}

/// Extractor that downloads over HTTP, verifies the MD5 digest and unpacks
/// with `tar`.
#[derive(Debug)]
pub struct HttpArchiveExtractor<R> {
    client: reqwest::Client,
    runner: Arc<R>,
    tar: String,
    scratch: Utf8PathBuf,
}

impl<R> HttpArchiveExtractor<R>
where
    R: CommandRunner + Send + Sync + 'static,
{
    /// Creates an extractor staging downloads under `scratch`.
    #[must_use]
    pub fn new(runner: R, tar: impl Into<String>, scratch: impl Into<Utf8PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            runner: Arc::new(runner),
            tar: tar.into(),
            scratch: scratch.into(),
        }
    }

    /// Streams the archive into `staged`, hashing each chunk as it lands.
    async fn download(
        &self,
        archive: &ArchiveDescriptor,
        staged: &Utf8Path,
    ) -> Result<String, ArchiveError> {
        let failed = |err: reqwest::Error| ArchiveError::Download {
            url: archive.url.clone(),
            message: err.to_string(),
        };
        let stage_failed = |err: io::Error| ArchiveError::Download {
            url: archive.url.clone(),
            message: format!("cannot stage {staged}: {err}"),
        };
        let mut response = self
            .client
            .get(&archive.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(failed)?;
        let mut sink = StagedDownload::create(staged).map_err(stage_failed)?;
        while let Some(chunk) = response.chunk().await.map_err(failed)? {
            sink.push(&chunk).map_err(stage_failed)?;
        }
        sink.finish().map_err(stage_failed)
    }

    async fn unpack(
        &self,
        archive: &ArchiveDescriptor,
        staged: Utf8PathBuf,
        target: &Utf8Path,
    ) -> Result<(), ArchiveError> {
        let runner = Arc::clone(&self.runner);
        let tar = self.tar.clone();
        let args = vec![
            OsString::from("-xzf"),
            OsString::from(staged.as_str()),
            OsString::from("-C"),
            OsString::from(target.as_str()),
        ];
        let outcome = tokio::task::spawn_blocking(move || run_checked(runner.as_ref(), &tar, &args))
            .await
            .unwrap_or_else(|err| Err(err.to_string()));
        outcome.map_err(|message| ArchiveError::Unpack {
            url: archive.url.clone(),
            target: target.to_path_buf(),
            message,
        })
    }
}

impl<R> ArchiveExtractor for HttpArchiveExtractor<R>
where
    R: CommandRunner + Send + Sync + 'static,
{
    fn extract<'a>(
        &'a self,
        archive: &'a ArchiveDescriptor,
        target: &'a Utf8Path,
    ) -> BackendFuture<'a, (), ArchiveError> {
        Box::pin(async move {
            let staged = self
                .scratch
                .join(format!("ballast-{}.tar.gz", Uuid::new_v4().simple()));
            let result = match self.download(archive, &staged).await {
                Ok(digest) => match check_digest(archive, digest) {
                    Ok(()) => self.unpack(archive, staged.clone(), target).await,
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };
            if let Err(err) = hostfs::remove_file(&staged) {
                error!(path = %staged, error = %err, "cannot remove staged archive");
            }
            result
        })
    }
}

/// File sink that keeps a running MD5 digest of everything written.
struct StagedDownload {
    file: cap_std::fs_utf8::File,
    digest: md5::Context,
}

impl StagedDownload {
    fn create(path: &Utf8Path) -> io::Result<Self> {
        Ok(Self {
            file: hostfs::create_file(path)?,
            digest: md5::Context::new(),
        })
    }

    fn push(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.digest.consume(chunk);
        self.file.write_all(chunk)
    }

    /// Flushes the file and returns the lowercase hex digest.
    fn finish(mut self) -> io::Result<String> {
        self.file.flush()?;
        Ok(format!("{:x}", self.digest.compute()))
    }
}

/// Compares the MD5 digest of `bytes` with the descriptor checksum.
///
/// # Errors
///
/// Returns [`ArchiveError::Checksum`] on mismatch.
pub fn verify_checksum(archive: &ArchiveDescriptor, bytes: &[u8]) -> Result<(), ArchiveError> {
    check_digest(archive, format!("{:x}", md5::compute(bytes)))
}

fn check_digest(archive: &ArchiveDescriptor, actual: String) -> Result<(), ArchiveError> {
    if actual.eq_ignore_ascii_case(archive.checksum.trim()) {
        return Ok(());
    }
    Err(ArchiveError::Checksum {
        url: archive.url.clone(),
        expected: archive.checksum.clone(),
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::ServiceRole;
    use crate::test_support::{FakeExtractor, RecordingFilesystem};

    fn descriptor(checksum: &str) -> ArchiveDescriptor {
        ArchiveDescriptor {
            url: String::from("https://example.invalid/data.tar.gz"),
            checksum: checksum.to_owned(),
            marker: None,
        }
    }

    #[test]
    fn checksum_accepts_matching_digest() {
        // md5("hello")
        let archive = descriptor("5D41402ABC4B2A76B9719D911017C592");
        assert_eq!(verify_checksum(&archive, b"hello"), Ok(()));
    }

    #[test]
    fn checksum_rejects_other_bytes() {
        let archive = descriptor("5d41402abc4b2a76b9719d911017c592");
        let err = verify_checksum(&archive, b"hello!")
            .expect_err("different bytes must not verify");
        assert!(matches!(err, ArchiveError::Checksum { .. }));
    }

    #[test]
    fn staged_download_hashes_chunks_as_written() {
        let tmp = tempfile::TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non UTF-8 temp path {}", path.display()));
        let staged = root.join("archive.tar.gz");

        let mut sink =
            StagedDownload::create(&staged).unwrap_or_else(|err| panic!("create: {err}"));
        for chunk in [b"he".as_slice(), b"l".as_slice(), b"lo".as_slice()] {
            sink.push(chunk).unwrap_or_else(|err| panic!("push: {err}"));
        }
        let digest = sink.finish().unwrap_or_else(|err| panic!("finish: {err}"));

        assert_eq!(digest, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(check_digest(&descriptor(&digest), digest.clone()), Ok(()));
        let written = hostfs::read_to_string(&staged).unwrap_or_else(|err| panic!("read: {err}"));
        assert_eq!(written, "hello");
    }

    #[tokio::test]
    async fn successful_extraction_shares_filesystem() {
        let fs = Arc::new(RecordingFilesystem::new("data", "/mnt/data", vec![ServiceRole::Generic]));
        let extractor = Arc::new(FakeExtractor::succeeding());
        let task = ExtractionTask::spawn(
            extractor.clone(),
            descriptor("x"),
            Utf8PathBuf::from("/mnt/data"),
            fs.clone(),
        );
        task.wait().await.unwrap_or_else(|err| panic!("extraction: {err}"));

        assert_eq!(fs.state(), ServiceState::Running);
        assert_eq!(fs.share_count(), 1);
        assert_eq!(extractor.targets(), [Utf8PathBuf::from("/mnt/data")]);
    }

    #[tokio::test]
    async fn failed_extraction_marks_error() {
        let fs = Arc::new(RecordingFilesystem::new("data", "/mnt/data", vec![ServiceRole::Generic]));
        let task = ExtractionTask::spawn(
            Arc::new(FakeExtractor::failing("boom")),
            descriptor("x"),
            Utf8PathBuf::from("/mnt/data"),
            fs.clone(),
        );
        assert!(task.wait().await.is_err());
        assert_eq!(fs.state(), ServiceState::Error);
        assert_eq!(fs.share_count(), 0);
    }
}
