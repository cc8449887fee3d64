use crate::error::PipelineError;
use crate::models::{ImageReference, ReferenceKind};
use regex::Regex;
use std::ops::Range;

const MARKDOWN_IMAGE: &str =
    r#"!\[[^\]\n]*\]\(\s*<?(?P<target>[^)\s>]+)>?(?:\s+"[^"\n]*")?\s*\)"#;
const HTML_IMAGE: &str = r#"(?i)<img\b[^>]*?[\s"']src\s*=\s*["'](?P<target>[^"']+)["'][^>]*>"#;
const MARKDOWN_LINK: &str =
    r"(?i)\[[^\]\n]*\]\(\s*(?P<target>[^)\s]+\.(?:png|jpe?g|gif|webp|bmp))\s*\)";
const PLACEHOLDER: &str = r"(?i)<!--\s*image\s*-->";
const BARE_FILENAME: &str = r"(?i)(?P<target>[\w./\\-]*[\w-]\.(?:png|jpe?g|gif|webp|bmp))\b";
const ORDINAL: &str = r"(?i)(?:^|[/\\])image(?P<n>\d+)\.(?:png|jpe?g|gif|webp|bmp)$";

pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];

#[derive(Debug, Clone)]
pub struct ReferenceGrammar {
    patterns: Vec<(ReferenceKind, Regex)>,
    ordinal: Regex,
}

impl ReferenceGrammar {
    pub fn new() -> Result<Self, PipelineError> {
        Ok(Self {
            patterns: vec![
                (ReferenceKind::MarkdownImage, Regex::new(MARKDOWN_IMAGE)?),
                (ReferenceKind::HtmlImage, Regex::new(HTML_IMAGE)?),
                (ReferenceKind::MarkdownLink, Regex::new(MARKDOWN_LINK)?),
                (ReferenceKind::Placeholder, Regex::new(PLACEHOLDER)?),
                (ReferenceKind::BareFilename, Regex::new(BARE_FILENAME)?),
            ],
            ordinal: Regex::new(ORDINAL)?,
        })
    }

    /// Patterns run in priority order; a match overlapping an earlier one is dropped.
    pub fn scan(&self, text: &str) -> Vec<ImageReference> {
        let mut accepted: Vec<ImageReference> = Vec::new();

        for (kind, pattern) in &self.patterns {
            for captures in pattern.captures_iter(text) {
                let Some(whole) = captures.get(0) else {
                    continue;
                };
                let span = whole.range();
                if accepted.iter().any(|taken| overlaps(&taken.span, &span)) {
                    continue;
                }

                accepted.push(ImageReference {
                    kind: *kind,
                    span,
                    target_span: captures.name("target").map(|target| target.range()),
                });
            }
        }

        accepted.sort_by_key(|reference| reference.span.start);
        accepted
    }

    pub fn ordinal_of(&self, target: &str) -> Option<u32> {
        let target = target.trim();
        let target = target.split(['?', '#']).next().unwrap_or(target);
        self.ordinal
            .captures(target)
            .and_then(|captures| captures.name("n"))
            .and_then(|n| n.as_str().parse().ok())
    }
}

fn overlaps(left: &Range<usize>, right: &Range<usize>) -> bool {
    left.start < right.end && right.start < left.end
}

pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> ReferenceGrammar {
        ReferenceGrammar::new().expect("grammar compiles")
    }

    #[test]
    fn markdown_image_is_not_also_a_link_or_bare_name() {
        let text = "Intro ![Image](texto_artifacts/image_000000_ab12.png) end";
        let refs = grammar().scan(text);

        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, ReferenceKind::MarkdownImage);
        assert_eq!(
            refs[0].target(text),
            Some("texto_artifacts/image_000000_ab12.png")
        );
    }

    #[test]
    fn every_syntax_is_detected_in_document_order() {
        let text = "a [ver](fig.jpg)\n<img src=\"x/y.png\" alt=\"\">\n<!-- image -->\nsee image3.png\n![t](z.gif \"title\")";
        let kinds = grammar()
            .scan(text)
            .into_iter()
            .map(|reference| reference.kind)
            .collect::<Vec<_>>();

        assert_eq!(
            kinds,
            vec![
                ReferenceKind::MarkdownLink,
                ReferenceKind::HtmlImage,
                ReferenceKind::Placeholder,
                ReferenceKind::BareFilename,
                ReferenceKind::MarkdownImage,
            ]
        );
    }

    #[test]
    fn html_src_is_not_confused_with_data_src() {
        let text = r#"<img data-src="lazy.png" src="real.png"> <IMG class="x"src='otra.png'>"#;
        let grammar = grammar();
        let targets = grammar
            .scan(text)
            .iter()
            .map(|reference| reference.target(text))
            .collect::<Vec<_>>();

        assert_eq!(targets, vec![Some("real.png"), Some("otra.png")]);
    }

    #[test]
    fn links_to_documents_are_ignored() {
        let refs = grammar().scan("read [the notes](notes.pdf) first");
        assert!(refs.is_empty());
    }

    #[test]
    fn ordinal_is_read_from_the_file_stem() {
        let grammar = grammar();
        assert_eq!(grammar.ordinal_of("imagenes_extraidas/image12.png"), Some(12));
        assert_eq!(grammar.ordinal_of("image3.JPG"), Some(3));
        assert_eq!(grammar.ordinal_of("image_000000_ab12.png"), None);
        assert_eq!(grammar.ordinal_of("myimage2.png"), None);
    }
}
