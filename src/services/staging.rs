use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Prefix of every staging directory name
pub const STAGING_PREFIX: &str = "latex-";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("failed to read upload: {0}")]
    Read(io::Error),

    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("failed to write upload: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("{0}")]
    Corrupt(#[from] zip::result::ZipError),

    #[error("suspicious path: {0}")]
    UnsafePath(String),

    #[error("conflicting entry: {0}")]
    Conflict(String),

    #[error("uncompressed size too large (limit {limit} bytes)")]
    TooLarge { limit: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What an extraction wrote into the staging directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Per-request scratch directory.
///
/// The directory and everything in it is removed when the value is dropped,
/// whichever way the request ends.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Creates a fresh, uniquely named directory under `root` (or the system temp dir)
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        tracing::debug!("Created staging directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Streams the uploaded archive to `<staging>/<filename>`.
    ///
    /// `filename` must already be sanitized.
    pub async fn save_upload<R>(
        &self,
        filename: &str,
        mut reader: R,
        limit: u64,
    ) -> Result<PathBuf, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.dir.path().join(filename);
        let mut file = tokio::fs::File::create(&path).await?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut written: u64 = 0;

        loop {
            let n = reader.read(&mut buffer).await.map_err(UploadError::Read)?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > limit {
                return Err(UploadError::TooLarge { limit });
            }
            file.write_all(&buffer[..n]).await?;
        }
        file.flush().await?;

        tracing::debug!("Saved upload {} ({} bytes)", path.display(), written);
        Ok(path)
    }

    /// Extracts a ZIP archive into the staging directory on a blocking thread.
    ///
    /// The whole archive is rejected if any entry would land outside the
    /// staging directory or if the uncompressed total exceeds `max_total`.
    pub async fn extract_archive(
        &self,
        archive: &Path,
        max_total: u64,
    ) -> Result<ExtractionSummary, ArchiveError> {
        let archive = archive.to_path_buf();
        let dest = self.dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || extract_zip(&archive, &dest, max_total))
            .await
            .map_err(|e| ArchiveError::Io(io::Error::other(e)))?
    }

    /// Returns the path of `name` if it exists as a regular file in the staging directory
    pub async fn locate_source(&self, name: &str) -> Option<PathBuf> {
        let relative = safe_relative_path(name)?;
        let path = self.dir.path().join(relative);
        match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        tracing::debug!("Removing staging directory {}", self.dir.path().display());
    }
}

fn extract_zip(archive: &Path, dest: &Path, max_total: u64) -> Result<ExtractionSummary, ArchiveError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;

    // Declared sizes can lie, so this is checked again while copying
    let mut declared: u64 = 0;
    for i in 0..zip.len() {
        declared = declared.saturating_add(zip.by_index(i)?.size());
        if declared > max_total {
            return Err(ArchiveError::TooLarge { limit: max_total });
        }
    }

    let mut summary = ExtractionSummary::default();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().to_string();

        let relative = safe_relative_path(&name).ok_or_else(|| {
            tracing::warn!("Rejecting archive entry outside staging directory: {}", name);
            ArchiveError::UnsafePath(name.clone())
        })?;
        let target = dest.join(&relative);
        if !target.starts_with(dest) {
            return Err(ArchiveError::UnsafePath(name));
        }

        if target == archive {
            tracing::warn!("Skipping archive entry that shadows the upload: {}", name);
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| placement_error(e, &name))?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| placement_error(e, &name))?;
        }

        let remaining = max_total - summary.bytes;
        let mut out = File::create(&target).map_err(|e| placement_error(e, &name))?;
        let copied = io::copy(&mut (&mut entry).take(remaining + 1), &mut out)?;
        summary.bytes += copied;
        if copied > remaining {
            return Err(ArchiveError::TooLarge { limit: max_total });
        }
        summary.files += 1;
    }

    Ok(summary)
}

/// Maps a file/directory clash between entries to `Conflict`; anything else
/// stays an I/O error
fn placement_error(e: io::Error, name: &str) -> ArchiveError {
    match e.kind() {
        io::ErrorKind::AlreadyExists
        | io::ErrorKind::NotADirectory
        | io::ErrorKind::IsADirectory => {
            tracing::warn!("Rejecting archive entry that clashes with another: {}", name);
            ArchiveError::Conflict(name.to_string())
        }
        _ => ArchiveError::Io(e),
    }
}

/// Normalizes an archive entry name into a path that stays below its root.
///
/// Returns `None` for absolute paths, drive prefixes, `..` components,
/// NUL bytes, and names that resolve to the root itself.
pub fn safe_relative_path(name: &str) -> Option<PathBuf> {
    if name.contains('\0') {
        return None;
    }

    // Archives built on Windows may use backslashes
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') || normalized.contains(':') {
        return None;
    }

    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}
