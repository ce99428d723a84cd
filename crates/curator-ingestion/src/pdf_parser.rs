//! lopdf-based PDF parsing with section detection.
//!
//! Extraction is CPU-bound and runs on the blocking pool under a deadline;
//! the pipeline bounds how many parses run at once.

use async_trait::async_trait;
use chrono::Utc;
use curator_config::PdfParserConfig;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::StageError;
use crate::models::{ContentHandle, ParsedContent, ParserKind, Section};
use crate::pipeline::StagePermit;

/// Extracts structured text from fetched content.
///
/// `Ok(None)` means the document was readable but yielded no text.
#[async_trait]
pub trait ContentParser: Send + Sync {
    async fn parse(&self, handle: &ContentHandle) -> Result<Option<ParsedContent>, StageError>;

    /// Parse while holding a parse slot. Parsers that hand work to another
    /// thread must keep `slot` alive until that work ends, even if `parse`
    /// has already given up on it.
    async fn parse_in_slot(
        &self,
        handle: &ContentHandle,
        slot: StagePermit,
    ) -> Result<Option<ParsedContent>, StageError> {
        let _slot = slot;
        self.parse(handle).await
    }
}

#[derive(Debug, Clone)]
pub struct LopdfParser {
    max_pages: usize,
    max_file_size_bytes: u64,
    timeout: Duration,
}

impl LopdfParser {
    pub fn new(max_pages: usize, max_file_size_bytes: u64, timeout: Duration) -> Self {
        Self { max_pages, max_file_size_bytes, timeout }
    }

    pub fn from_config(config: &PdfParserConfig) -> Self {
        Self::new(
            config.max_pages,
            config.max_file_size_mb * 1024 * 1024,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    #[instrument(skip(self, handle, slot), fields(path = %handle.path.display()))]
    async fn parse_file(
        &self,
        handle: &ContentHandle,
        slot: Option<StagePermit>,
    ) -> Result<Option<ParsedContent>, StageError> {
        let path = handle.path.clone();
        let max_pages = self.max_pages;
        let max_bytes = self.max_file_size_bytes;

        let result = run_blocking(self.timeout, slot, move || {
            validate_pdf(&path, max_bytes)?;
            let (raw_text, pages_total, pages_read) = extract_text(&path, max_pages)?;
            Ok(build_content(raw_text, pages_total, pages_read))
        })
        .await;

        match &result {
            Ok(Some(content)) => debug!(
                sections = content.sections.len(),
                references = content.references.len(),
                chars = content.raw_text.len(),
                "PDF parsed"
            ),
            Ok(None) => warn!("PDF contained no extractable text"),
            Err(e) => warn!(error = %e, "PDF parsing failed"),
        }
        result
    }
}

#[async_trait]
impl ContentParser for LopdfParser {
    async fn parse(&self, handle: &ContentHandle) -> Result<Option<ParsedContent>, StageError> {
        self.parse_file(handle, None).await
    }

    async fn parse_in_slot(
        &self,
        handle: &ContentHandle,
        slot: StagePermit,
    ) -> Result<Option<ParsedContent>, StageError> {
        self.parse_file(handle, Some(slot)).await
    }
}

/// Run `work` on the blocking pool under `timeout`. A timed-out task keeps
/// running to completion, and `slot` is released only when it does.
async fn run_blocking<T, F>(timeout: Duration, slot: Option<StagePermit>, work: F) -> Result<T, StageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StageError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let _slot = slot;
        work()
    });
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(StageError::Rejected(format!("parser task failed: {join_err}"))),
        Err(_) => Err(StageError::Timeout),
    }
}

/// Reject files that are missing, empty, oversized or not PDFs.
fn validate_pdf(path: &Path, max_bytes: u64) -> Result<(), StageError> {
    let meta = std::fs::metadata(path)
        .map_err(|e| StageError::Invalid(format!("cannot stat {}: {e}", path.display())))?;
    if meta.len() == 0 {
        return Err(StageError::Invalid("PDF file is empty".to_string()));
    }
    if meta.len() > max_bytes {
        return Err(StageError::Invalid(format!(
            "PDF is {} bytes, limit is {max_bytes}",
            meta.len()
        )));
    }

    let mut header = [0u8; 4];
    std::fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut header))
        .map_err(|e| StageError::Invalid(format!("cannot read header: {e}")))?;
    if &header != b"%PDF" {
        return Err(StageError::Invalid("missing %PDF header".to_string()));
    }
    Ok(())
}

/// Text of the first `max_pages` pages, plus total and read page counts.
fn extract_text(path: &Path, max_pages: usize) -> Result<(String, usize, usize), StageError> {
    let doc = lopdf::Document::load(path).map_err(|e| StageError::Invalid(format!("corrupt PDF: {e}")))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let selected: Vec<u32> = pages.iter().copied().take(max_pages).collect();

    let mut text = String::new();
    for page in &selected {
        // A page lopdf cannot decode is skipped rather than failing the document.
        match doc.extract_text(&[*page]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => debug!(page, error = %e, "Skipping unreadable page"),
        }
    }
    Ok((text, pages.len(), selected.len()))
}

fn build_content(raw_text: String, pages_total: usize, pages_read: usize) -> Option<ParsedContent> {
    let raw_text = normalize_text(&raw_text);
    if raw_text.trim().is_empty() {
        return None;
    }

    let sections = detect_sections(&raw_text);
    let references = extract_references(&sections);

    Some(ParsedContent {
        parser_metadata: serde_json::json!({
            "pages_total": pages_total,
            "pages_parsed": pages_read,
            "truncated": pages_read < pages_total,
        }),
        raw_text,
        sections,
        references,
        parser_used: ParserKind::Lopdf,
        extracted_at: Utc::now(),
    })
}

/// Collapse runs of spaces inside lines and drop blank lines.
fn normalize_text(text: &str) -> String {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

const SECTION_HEADINGS: &[&str] = &[
    "abstract",
    "introduction",
    "background",
    "related work",
    "preliminaries",
    "method",
    "methods",
    "methodology",
    "approach",
    "model",
    "experiments",
    "experimental setup",
    "evaluation",
    "results",
    "discussion",
    "limitations",
    "conclusion",
    "conclusions",
    "acknowledgments",
    "acknowledgements",
    "references",
    "bibliography",
    "appendix",
];

/// Heading text if `line` looks like a section heading: a known heading
/// word, optionally prefixed by a section number ("3", "3.1", "III.").
fn heading_of(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.len() > 60 {
        return None;
    }

    let body = match trimmed.split_once(' ') {
        Some((prefix, rest)) if is_section_number(prefix) => rest.trim(),
        _ => trimmed,
    };
    let normalized = body.trim_end_matches(['.', ':']).to_lowercase();

    SECTION_HEADINGS
        .contains(&normalized.as_str())
        .then(|| body.trim_end_matches(['.', ':']).to_string())
}

fn is_section_number(prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('.');
    if prefix.is_empty() {
        return false;
    }
    let numeric = prefix.split('.').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    let roman = prefix.chars().all(|c| matches!(c, 'I' | 'V' | 'X'));
    numeric || roman
}

/// Split text into sections at detected headings. Text before the first
/// heading becomes a "Front Matter" section.
pub fn detect_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut title = "Front Matter".to_string();
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(heading) = heading_of(line) {
            if !body.is_empty() {
                sections.push(Section { title: title.clone(), content: body.join("\n") });
            }
            title = heading;
            body.clear();
        } else {
            body.push(line);
        }
    }
    if !body.is_empty() {
        sections.push(Section { title, content: body.join("\n") });
    }
    sections
}

fn starts_reference(line: &str) -> bool {
    let line = line.trim_start();
    if let Some(rest) = line.strip_prefix('[') {
        return rest.split_once(']').is_some_and(|(n, _)| !n.is_empty() && n.len() <= 4);
    }
    line.split_once(". ")
        .is_some_and(|(n, _)| !n.is_empty() && n.len() <= 3 && n.chars().all(|c| c.is_ascii_digit()))
}

/// Entries of the references section. Numbered entries (`[12]`, `12.`)
/// start a new reference; other lines continue the previous one. Without
/// numbering, each line is an entry.
pub fn extract_references(sections: &[Section]) -> Vec<String> {
    let Some(refs) = sections.iter().rev().find(|s| {
        let t = s.title.to_lowercase();
        t == "references" || t == "bibliography"
    }) else {
        return Vec::new();
    };

    let lines: Vec<&str> = refs.content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if !lines.iter().any(|l| starts_reference(l)) {
        return lines.into_iter().map(str::to_string).collect();
    }

    let mut entries: Vec<String> = Vec::new();
    for line in lines {
        match entries.last_mut() {
            Some(last) if !starts_reference(line) => {
                last.push(' ');
                last.push_str(line);
            }
            _ => entries.push(line.to_string()),
        }
    }
    entries
}
