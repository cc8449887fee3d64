use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub ordinal: u32,
    pub path: PathBuf,
}

impl ImageAsset {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("image{}.png", self.ordinal))
    }

    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "png".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub ordinal: u32,
    pub image_path: PathBuf,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    MarkdownImage,
    HtmlImage,
    MarkdownLink,
    Placeholder,
    BareFilename,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub kind: ReferenceKind,
    pub span: Range<usize>,
    /// Byte range of the path inside `span`; `None` for placeholders.
    pub target_span: Option<Range<usize>>,
}

impl ImageReference {
    pub fn target<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.target_span.clone().map(|range| &text[range])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub paragraphs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub index: usize,
    pub distance: f32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionFailure {
    pub ordinal: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub images: usize,
    pub captioned: usize,
    pub failed: Vec<CaptionFailure>,
    pub corrections: usize,
    pub replaced: usize,
    pub missing: usize,
}

impl RunReport {
    /// Reason a finished `process` run still counts as failed.
    pub fn failure(&self) -> Option<String> {
        if self.images == 0 {
            Some("no images were found in the document".to_string())
        } else if self.captioned == 0 {
            Some(format!("none of the {} images could be described", self.images))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub source_path: String,
    pub source_sha256: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub report: RunReport,
}
