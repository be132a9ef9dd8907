/// PDF magic bytes
const PDF_SIGNATURE: &[u8] = b"%PDF";

/// Maximum sanitized filename length in bytes
const MAX_FILENAME_LEN: usize = 255;

pub const INVALID_FILE_TYPE_MESSAGE: &str = "Invalid file type. Please upload a ZIP file.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Sanitizes filename to prevent path traversal and injection attacks
/// Returns the sanitized filename or an error if the name is invalid
pub fn sanitize_filename(filename: &str) -> Result<String, ValidationError> {
    // Both separators count, whatever the host platform
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            c if c.is_control() => '_',
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ';' => '_',
            c => c,
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > MAX_FILENAME_LEN {
        let mut end = MAX_FILENAME_LEN;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    // Leading dots would make the staged file hidden
    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot consist of dots only".to_string(),
        });
    }

    Ok(sanitized.to_string())
}

/// Checks the client-supplied upload name and returns the name to stage it under.
///
/// Runs before anything touches the filesystem. The suffix comparison is
/// case-insensitive so `Paper.ZIP` is accepted.
pub fn validate_archive_filename(filename: &str, suffix: &str) -> Result<String, ValidationError> {
    let invalid = || ValidationError {
        code: "INVALID_FILE_TYPE",
        message: INVALID_FILE_TYPE_MESSAGE.to_string(),
    };

    let trimmed = filename.trim();
    if trimmed.is_empty() || !trimmed.to_lowercase().ends_with(&suffix.to_lowercase()) {
        return Err(invalid());
    }

    let sanitized = sanitize_filename(trimmed).map_err(|_| invalid())?;

    // A bare ".zip" survives the suffix check but names nothing
    if sanitized.len() <= suffix.len() {
        return Err(invalid());
    }

    Ok(sanitized)
}

/// Checks whether a byte buffer starts with the PDF signature
pub fn is_pdf(header: &[u8]) -> bool {
    header.starts_with(PDF_SIGNATURE)
}
