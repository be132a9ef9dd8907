use crate::api::error::AppError;
use crate::config::CompileConfig;
use crate::services::compiler::{CompileOutcome, DocumentCompiler};
use crate::services::staging::{ArchiveError, StagingArea};
use crate::utils::validation::is_pdf;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// A rendered document still sitting in its staging directory.
///
/// The staging directory is removed when this value (or the `staging` field
/// moved out of it) is dropped.
#[derive(Debug)]
pub struct CompiledDocument {
    pub staging: StagingArea,
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

pub struct CompileService {
    config: CompileConfig,
    compiler: Arc<dyn DocumentCompiler>,
}

impl CompileService {
    pub fn new(config: CompileConfig, compiler: Arc<dyn DocumentCompiler>) -> Self {
        Self { config, compiler }
    }

    /// Extract, locate the source, compile, and confirm the artifact is a PDF.
    ///
    /// Each step short-circuits the rest on failure; nothing is retried.
    pub async fn compile_archive(
        &self,
        staging: StagingArea,
        archive_path: &Path,
    ) -> Result<CompiledDocument, AppError> {
        let summary = staging
            .extract_archive(archive_path, self.config.max_extracted_size())
            .await
            .map_err(|e| match e {
                ArchiveError::Io(e) => AppError::Io(e),
                other => {
                    warn!("Rejected archive {}: {}", archive_path.display(), other);
                    AppError::InvalidArchive(other.to_string())
                }
            })?;
        info!(
            "📦 Extracted {} files ({} bytes) into {}",
            summary.files,
            summary.bytes,
            staging.path().display()
        );

        let source = staging
            .locate_source(&self.config.source_filename)
            .await
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "No {} found in the ZIP file",
                    self.config.source_filename
                ))
            })?;

        match self.compiler.compile(&source, staging.path()).await? {
            CompileOutcome::Success => {}
            CompileOutcome::Failed {
                exit_code,
                stdout,
                stderr,
            } => {
                warn!("Compiler exited with code {:?}", exit_code);
                return Err(AppError::CompilationFailed {
                    details: diagnostics(&stderr, &stdout, self.config.max_details_size),
                });
            }
            CompileOutcome::TimedOut { after } => {
                return Err(AppError::CompilationTimeout(after.as_secs()));
            }
        }

        let filename = self.config.output_filename();
        let path = staging.path().join(&filename);
        let size = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(AppError::OutputMissing),
        };

        let mut header = Vec::with_capacity(8);
        tokio::fs::File::open(&path)
            .await?
            .take(8)
            .read_to_end(&mut header)
            .await?;
        if !is_pdf(&header) {
            warn!("{} exists but is not a PDF", path.display());
            return Err(AppError::OutputMissing);
        }

        info!("📄 Compiled {} ({} bytes)", filename, size);

        Ok(CompiledDocument {
            staging,
            path,
            filename,
            size,
        })
    }
}

/// Picks the diagnostic text returned to the caller.
///
/// Prefers stderr; pdflatex prints most errors to stdout, so that is the
/// fallback. Keeps the tail, where the fatal error usually is.
pub fn diagnostics(stderr: &str, stdout: &str, max_len: usize) -> String {
    let text = [stderr, stdout]
        .into_iter()
        .map(str::trim_end)
        .find(|s| !s.trim().is_empty());

    match text {
        Some(text) => tail(text, max_len).to_string(),
        None => "The compiler exited without diagnostic output".to_string(),
    }
}

fn tail(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut start = s.len() - max_len;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
