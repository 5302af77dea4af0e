//! Document-to-structure conversion adapter.
//!
//! Wraps the external conversion engines (page-wise PDF text via
//! `pdf-extract`, plain reads for text and markdown) behind a single
//! `extract` entry point that yields an ordered, provenance-carrying
//! [`StructuredDocument`]. Conversion internals stay outside this crate;
//! this module only normalizes their output.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use thiserror::Error;

/// Errors raised while converting a file into a structured document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The file does not exist at the resolved path.
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    /// The file extension maps to no supported conversion engine.
    #[error("Unsupported document type: {0}")]
    Unsupported(String),
    /// The conversion engine failed on the file contents.
    #[error("Failed to convert {path}: {source}")]
    Conversion {
        /// File that failed to convert.
        path: PathBuf,
        /// Underlying error raised by the conversion engine.
        #[source]
        source: anyhow::Error,
    },
}

/// Ordered text sections plus provenance produced by extraction.
#[derive(Debug, Clone)]
pub struct StructuredDocument {
    /// Document title, when one could be derived.
    pub title: Option<String>,
    /// Ordered sections carrying page/heading provenance.
    pub sections: Vec<DocumentSection>,
    /// Structural dump persisted as document-level metadata.
    pub structure: Value,
}

/// One contiguous span of extracted text.
#[derive(Debug, Clone)]
pub struct DocumentSection {
    /// Heading introducing the span, when the format carries one.
    pub heading: Option<String>,
    /// 1-based page number for paginated formats.
    pub page: Option<u32>,
    /// Extracted text of the span.
    pub text: String,
}

/// Adapter that turns an uploaded file into a [`StructuredDocument`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentExtractor;

impl DocumentExtractor {
    /// Construct the extractor. Stateless; conversion engines load lazily.
    pub const fn new() -> Self {
        Self
    }

    /// Convert the file at `path` into its structured representation.
    pub fn extract(&self, path: &Path) -> Result<StructuredDocument, ExtractionError> {
        if !path.exists() {
            return Err(ExtractionError::NotFound(path.to_path_buf()));
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        tracing::debug!(path = %path.display(), extension, "Extracting document");
        match extension.as_str() {
            "pdf" => extract_pdf(path),
            "md" | "markdown" => extract_markdown(path),
            "txt" | "text" | "" => extract_plain_text(path),
            other => Err(ExtractionError::Unsupported(other.to_string())),
        }
    }
}

fn extract_pdf(path: &Path) -> Result<StructuredDocument, ExtractionError> {
    let pages = pdf_extract::extract_text_by_pages(path).map_err(|err| {
        ExtractionError::Conversion {
            path: path.to_path_buf(),
            source: anyhow::anyhow!(err.to_string()),
        }
    })?;

    let title = pages
        .first()
        .and_then(|page| first_line_title(page));
    let sections: Vec<DocumentSection> = pages
        .into_iter()
        .enumerate()
        .map(|(idx, text)| DocumentSection {
            heading: None,
            page: Some(idx as u32 + 1),
            text,
        })
        .collect();
    let structure = json!({
        "format": "pdf",
        "pages": sections.len(),
        "title": title,
    });

    Ok(StructuredDocument {
        title,
        sections,
        structure,
    })
}

fn extract_markdown(path: &Path) -> Result<StructuredDocument, ExtractionError> {
    let raw = read_utf8(path)?;

    let mut sections: Vec<DocumentSection> = Vec::new();
    let mut current = DocumentSection {
        heading: None,
        page: None,
        text: String::new(),
    };
    for line in raw.lines() {
        if let Some(heading) = markdown_heading(line) {
            if !current.text.trim().is_empty() || current.heading.is_some() {
                sections.push(current);
            }
            current = DocumentSection {
                heading: Some(heading.to_string()),
                page: None,
                text: String::new(),
            };
        } else {
            current.text.push_str(line);
            current.text.push('\n');
        }
    }
    if !current.text.trim().is_empty() || current.heading.is_some() {
        sections.push(current);
    }

    let title = sections
        .iter()
        .find_map(|section| section.heading.clone());
    let headings: Vec<&str> = sections
        .iter()
        .filter_map(|section| section.heading.as_deref())
        .collect();
    let structure = json!({
        "format": "markdown",
        "headings": headings,
        "title": title,
    });

    Ok(StructuredDocument {
        title,
        sections,
        structure,
    })
}

fn extract_plain_text(path: &Path) -> Result<StructuredDocument, ExtractionError> {
    let raw = read_utf8(path)?;
    let title = first_line_title(&raw);
    let structure = json!({
        "format": "text",
        "title": title,
    });

    Ok(StructuredDocument {
        title,
        sections: vec![DocumentSection {
            heading: None,
            page: None,
            text: raw,
        }],
        structure,
    })
}

fn read_utf8(path: &Path) -> Result<String, ExtractionError> {
    std::fs::read_to_string(path).map_err(|err| ExtractionError::Conversion {
        path: path.to_path_buf(),
        source: anyhow::Error::new(err),
    })
}

/// Treat a short leading line as the document title.
fn first_line_title(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    (line.len() <= 120).then(|| line.to_string())
}

fn markdown_heading(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let hashes = trimmed.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    rest.strip_prefix(' ').map(str::trim).filter(|t| !t.is_empty())
}
