use crate::config::CompileConfig;
use anyhow::{Result, anyhow};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Bytes of each output stream kept when no limit is configured
const DEFAULT_OUTPUT_LIMIT: usize = 8 * 1024;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Result of one typesetting run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Tool exited with status zero
    Success,
    /// Tool exited non-zero (or was killed by a signal)
    Failed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// Tool exceeded the deadline and was killed
    TimedOut { after: Duration },
}

/// Trait for typesetting implementations
#[async_trait::async_trait]
pub trait DocumentCompiler: Send + Sync {
    /// Compile `source`, writing every generated file into `output_dir`
    async fn compile(&self, source: &Path, output_dir: &Path) -> Result<CompileOutcome>;

    /// Check if the tool is installed and runnable
    async fn health_check(&self) -> bool;
}

/// Runs `pdflatex` (or a compatible engine) as a child process.
///
/// Output is captured, never forwarded to the terminal, and only the last
/// `output_limit` bytes of each stream are held. The child is killed when the
/// deadline passes or when the request future is dropped.
#[derive(Debug, Clone)]
pub struct PdfLatexCompiler {
    program: String,
    timeout: Duration,
    output_limit: usize,
}

impl PdfLatexCompiler {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

    pub fn from_config(config: &CompileConfig) -> Self {
        Self::new(config.latex_command.clone(), config.compile_timeout)
            .with_output_limit(config.max_details_size)
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit.max(1);
        self
    }

    fn command(&self, source: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-interaction=nonstopmode")
            .arg("-no-shell-escape")
            .arg("-output-directory")
            .arg(output_dir)
            .arg(source)
            .current_dir(output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl DocumentCompiler for PdfLatexCompiler {
    async fn compile(&self, source: &Path, output_dir: &Path) -> Result<CompileOutcome> {
        let mut child = self.command(source, output_dir).spawn().map_err(|e| {
            anyhow!(
                "Failed to spawn `{}`: {}. Is a TeX distribution installed?",
                self.program,
                e
            )
        })?;

        let started = Instant::now();
        tracing::info!("Running {} on {}", self.program, source.display());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            tokio::try_join!(
                child.wait(),
                capture_tail(stdout, self.output_limit),
                capture_tail(stderr, self.output_limit),
            )
        };

        let finished = tokio::time::timeout(self.timeout, run).await;
        let (status, stdout, stderr) = match finished {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    "{} exceeded {:?}, killing it",
                    self.program,
                    self.timeout
                );
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Failed to kill {}: {}", self.program, e);
                }
                return Ok(CompileOutcome::TimedOut {
                    after: self.timeout,
                });
            }
        };

        tracing::info!(
            "{} finished in {:?} with {}",
            self.program,
            started.elapsed(),
            status
        );

        if status.success() {
            Ok(CompileOutcome::Success)
        } else {
            Ok(CompileOutcome::Failed {
                exit_code: status.code(),
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            })
        }
    }

    async fn health_check(&self) -> bool {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(Duration::from_secs(5), status).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }
}

/// Drains `pipe` to EOF, keeping only its last `limit` bytes.
///
/// The pipe has to be read to the end or the child blocks once the OS
/// buffer fills.
async fn capture_tail<R>(pipe: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(Vec::new());
    };

    let mut kept = Vec::with_capacity(limit.min(READ_CHUNK_SIZE));
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        kept.extend_from_slice(&chunk[..n]);
        // Compact lazily so the buffer stays under twice the limit
        if kept.len() > limit * 2 {
            kept.drain(..kept.len() - limit);
        }
    }

    if kept.len() > limit {
        kept.drain(..kept.len() - limit);
    }
    Ok(kept)
}

/// Factory function to create the compiler described by the config
pub fn create_compiler(config: &CompileConfig) -> Arc<dyn DocumentCompiler> {
    Arc::new(PdfLatexCompiler::from_config(config))
}
