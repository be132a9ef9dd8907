use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the compile endpoint
#[derive(Debug, Clone)]
pub struct CompileConfig {
    /// Maximum upload size in bytes (default: 50 MB)
    pub max_upload_size: usize,

    /// Wall-clock limit for one run of the typesetting tool (default: 120 s)
    pub compile_timeout: Duration,

    /// Multipart field carrying the archive (default: "file")
    pub form_field: String,

    /// Source document expected at the archive root (default: "document.tex")
    pub source_filename: String,

    /// Typesetting executable, resolved through PATH (default: "pdflatex")
    pub latex_command: String,

    /// Required upload filename suffix
    pub archive_suffix: String,

    /// Allowed ratio of uncompressed archive contents to upload size (default: 5)
    pub expansion_factor: usize,

    /// Maximum bytes of tool diagnostics returned to the caller (default: 8 KB)
    pub max_details_size: usize,

    /// Parent directory for staging directories (default: system temp dir)
    pub staging_root: Option<PathBuf>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 50 * 1024 * 1024, // 50 MB
            compile_timeout: Duration::from_secs(120),
            form_field: "file".to_string(),
            source_filename: "document.tex".to_string(),
            latex_command: "pdflatex".to_string(),
            archive_suffix: ".zip".to_string(),
            expansion_factor: 5,
            max_details_size: 8 * 1024, // 8 KB
            staging_root: None,
        }
    }
}

impl CompileConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_upload_size: env::var("MAX_UPLOAD_MB")
                .ok()
                .and_then(|v| parse_scaled(&v, 1024 * 1024))
                .unwrap_or(default.max_upload_size),

            compile_timeout: env::var("LATEX_TIMEOUT_SEC")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default.compile_timeout),

            form_field: non_empty_var("FORM_FIELD").unwrap_or(default.form_field),

            source_filename: non_empty_var("TEX_FILENAME").unwrap_or(default.source_filename),

            latex_command: non_empty_var("LATEX_COMMAND").unwrap_or(default.latex_command),

            archive_suffix: default.archive_suffix,

            expansion_factor: env::var("MAX_EXPANSION_FACTOR")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|f| *f > 0)
                .unwrap_or(default.expansion_factor),

            max_details_size: env::var("MAX_DETAILS_KB")
                .ok()
                .and_then(|v| parse_scaled(&v, 1024))
                .unwrap_or(default.max_details_size),

            staging_root: non_empty_var("STAGING_ROOT").map(PathBuf::from),
        }
    }

    /// Create config for development and tests (small limits, short timeout)
    pub fn development() -> Self {
        Self {
            max_upload_size: 4 * 1024 * 1024,
            compile_timeout: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Name of the artifact the tool writes for the configured source document
    pub fn output_filename(&self) -> String {
        Path::new(&self.source_filename)
            .with_extension("pdf")
            .to_string_lossy()
            .into_owned()
    }

    /// Upper bound on the total uncompressed size of an extracted archive
    pub fn max_extracted_size(&self) -> u64 {
        (self.max_upload_size as u64).saturating_mul(self.expansion_factor as u64)
    }
}

/// Parses a positive count of `unit`-sized blocks into bytes; `None` on overflow
fn parse_scaled(raw: &str, unit: usize) -> Option<usize> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .and_then(|n| n.checked_mul(unit))
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompileConfig::default();
        assert_eq!(config.max_upload_size, 50 * 1024 * 1024);
        assert_eq!(config.compile_timeout, Duration::from_secs(120));
        assert_eq!(config.form_field, "file");
        assert_eq!(config.source_filename, "document.tex");
        assert_eq!(config.latex_command, "pdflatex");
        assert_eq!(config.archive_suffix, ".zip");
        assert!(config.staging_root.is_none());
    }

    #[test]
    fn test_development_config() {
        let config = CompileConfig::development();
        assert_eq!(config.max_upload_size, 4 * 1024 * 1024);
        assert_eq!(config.compile_timeout, Duration::from_secs(10));
        assert_eq!(config.source_filename, "document.tex");
    }

    #[test]
    fn test_output_filename() {
        let mut config = CompileConfig::default();
        assert_eq!(config.output_filename(), "document.pdf");

        config.source_filename = "thesis.tex".to_string();
        assert_eq!(config.output_filename(), "thesis.pdf");

        config.source_filename = "main".to_string();
        assert_eq!(config.output_filename(), "main.pdf");
    }

    #[test]
    fn test_max_extracted_size() {
        let config = CompileConfig::default();
        assert_eq!(config.max_extracted_size(), 250 * 1024 * 1024);

        let huge = CompileConfig {
            max_upload_size: usize::MAX,
            ..CompileConfig::default()
        };
        assert_eq!(huge.max_extracted_size(), u64::MAX);
    }

    #[test]
    fn test_parse_scaled() {
        assert_eq!(parse_scaled("50", 1024 * 1024), Some(50 * 1024 * 1024));
        assert_eq!(parse_scaled(" 8 ", 1024), Some(8 * 1024));

        assert_eq!(parse_scaled("0", 1024), None);
        assert_eq!(parse_scaled("-1", 1024), None);
        assert_eq!(parse_scaled("lots", 1024), None);
        assert_eq!(parse_scaled(&usize::MAX.to_string(), 1024 * 1024), None);
        assert_eq!(parse_scaled("18446744073709551616", 1), None);
    }
}
