use crate::models::Chunk;
use pulldown_cmark::{html, Options, Parser};
use scraper::{ElementRef, Html};

pub const DEFAULT_CHUNK_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_MAX_CHARS,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

pub fn markdown_to_plain_text(markdown: &str) -> String {
    let mut rendered = String::new();
    html::push_html(&mut rendered, Parser::new_ext(markdown, Options::ENABLE_TABLES));

    let fragment = Html::parse_fragment(&rendered);
    let mut blocks = Vec::new();
    for child in fragment.root_element().children() {
        let text = match (ElementRef::wrap(child), child.value().as_text()) {
            (Some(element), _) => element.text().collect::<String>(),
            (None, Some(text)) => String::from(&**text),
            _ => continue,
        };
        let text = text.trim();
        if !text.is_empty() {
            blocks.push(text.to_string());
        }
    }

    blocks.join("\n\n")
}

pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        current.push(line.trim_end());
    }

    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs
}

// A paragraph longer than the budget becomes a chunk of its own.
pub fn chunk_paragraphs(paragraphs: Vec<String>, config: ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for paragraph in paragraphs {
        let paragraph_len = paragraph.chars().count();

        if current.is_empty() {
            current_len = paragraph_len;
            current.push(paragraph);
            continue;
        }

        if current_len + 2 + paragraph_len <= config.max_chars {
            current_len += 2 + paragraph_len;
            current.push(paragraph);
        } else {
            push_chunk(&mut chunks, std::mem::take(&mut current));
            current_len = paragraph_len;
            current.push(paragraph);
        }
    }

    if !current.is_empty() {
        push_chunk(&mut chunks, current);
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<Chunk>, paragraphs: Vec<String>) {
    chunks.push(Chunk {
        index: chunks.len(),
        text: paragraphs.join("\n\n"),
        paragraphs,
    });
}

pub fn chunk_markdown(markdown: &str, config: ChunkingConfig) -> Vec<Chunk> {
    let plain = markdown_to_plain_text(markdown);
    chunk_paragraphs(split_paragraphs(&plain), config)
}
