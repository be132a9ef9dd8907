#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use latex_compile_service::config::CompileConfig;
use latex_compile_service::services::compiler::{CompileOutcome, DocumentCompiler};
use latex_compile_service::{AppState, create_app};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const BOUNDARY: &str = "---------------------------123456789012345678901234567";

pub const VALID_DOCUMENT: &str = r"\documentclass{article}
\begin{document}
Hello, world!
\end{document}
";

pub const BROKEN_DOCUMENT: &str = r"\documentclass{article}
\begin{document}
\undefinedmacro
\end{document}
";

/// Stand-in for pdflatex.
///
/// Writes `%PDF-1.4` followed by the source into `<stem>.pdf`. Sources
/// containing `\undefinedmacro` fail the way pdflatex does (diagnostics on
/// stdout, empty stderr); `%no-output` succeeds without writing anything;
/// `%not-a-pdf` writes a file without the PDF signature; `%hang` reports a
/// timeout.
#[derive(Default)]
pub struct FakeLatex {
    /// Directory listings observed at compile time, one per run
    pub observed: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

#[async_trait]
impl DocumentCompiler for FakeLatex {
    async fn compile(&self, source: &Path, output_dir: &Path) -> anyhow::Result<CompileOutcome> {
        let tex = tokio::fs::read_to_string(source).await?;

        let mut listing: Vec<String> = std::fs::read_dir(output_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        listing.sort();
        self.observed
            .lock()
            .unwrap()
            .push((output_dir.to_path_buf(), listing));

        // Give concurrent requests a chance to overlap
        tokio::time::sleep(Duration::from_millis(20)).await;

        if tex.contains(r"\undefinedmacro") {
            return Ok(CompileOutcome::Failed {
                exit_code: Some(1),
                stdout: "This is pdfTeX, Version 3.141592653\n! Undefined control sequence.\nl.3 \\undefinedmacro\n".to_string(),
                stderr: String::new(),
            });
        }
        if tex.contains("%hang") {
            return Ok(CompileOutcome::TimedOut {
                after: Duration::from_secs(3),
            });
        }
        if tex.contains("%no-output") {
            return Ok(CompileOutcome::Success);
        }
        let output = output_dir.join(source.with_extension("pdf").file_name().unwrap());
        if tex.contains("%not-a-pdf") {
            tokio::fs::write(output, b"This is not a PDF").await?;
            return Ok(CompileOutcome::Success);
        }

        let mut pdf = b"%PDF-1.4\n".to_vec();
        pdf.extend_from_slice(tex.as_bytes());
        pdf.extend_from_slice(b"\n%%EOF\n");
        tokio::fs::write(output, pdf).await?;

        Ok(CompileOutcome::Success)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

pub struct TestApp<C: DocumentCompiler = FakeLatex> {
    pub app: Router,
    pub compiler: Arc<C>,
    pub staging_root: tempfile::TempDir,
}

impl TestApp<FakeLatex> {
    pub fn new() -> Self {
        Self::with_config(CompileConfig::development())
    }

    pub fn with_config(config: CompileConfig) -> Self {
        Self::with_compiler(config, Arc::new(FakeLatex::default()))
    }
}

impl<C: DocumentCompiler + 'static> TestApp<C> {
    /// Builds the app with staging confined to a throwaway root
    pub fn with_compiler(mut config: CompileConfig, compiler: Arc<C>) -> Self {
        let staging_root = tempfile::tempdir().unwrap();
        config.staging_root = Some(staging_root.path().to_path_buf());

        let app = create_app(AppState::new(config, compiler.clone()));

        Self {
            app,
            compiler,
            staging_root,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body)
    }

    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, _, body) = self.send(request).await;
        let json = serde_json::from_slice(&body).unwrap_or_else(|_| {
            panic!(
                "Expected JSON body with status {}, got {:?}",
                status,
                String::from_utf8_lossy(&body)
            )
        });
        (status, json)
    }

    /// Staging directories still on disk
    pub fn leftover_staging_dirs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.staging_root.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect()
    }
}

pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn document_archive(tex: &str) -> Vec<u8> {
    zip_archive(&[("document.tex", tex.as_bytes())])
}

/// Multipart request with a single part; `filename: None` omits the filename attribute
pub fn compile_request(field: &str, filename: Option<&str>, data: &[u8]) -> Request<Body> {
    let disposition = match filename {
        Some(name) => format!("form-data; name=\"{}\"; filename=\"{}\"", field, name),
        None => format!("form-data; name=\"{}\"", field),
    };

    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/zip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/compile")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn upload(archive: &[u8]) -> Request<Body> {
    compile_request("file", Some("project.zip"), archive)
}
