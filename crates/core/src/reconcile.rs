use crate::error::{PipelineError, Result};
use crate::layout::relative_image_target;
use crate::models::{ImageAsset, ImageReference};
use crate::references::{is_image_extension, ReferenceGrammar};
use std::ops::Range;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

const FIGURE_KEYWORDS: [&str; 5] = ["figura", "imagen", "gráfico", "diagrama", "ilustración"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub markdown: String,
    pub corrections: usize,
    pub references: usize,
    pub synthesized: usize,
    pub unmatched_references: usize,
    pub unreferenced_images: usize,
}

pub async fn list_images(dir: &Path, grammar: &ReferenceGrammar) -> Result<Vec<ImageAsset>> {
    let is_dir = fs::metadata(dir).await.is_ok_and(|metadata| metadata.is_dir());
    if !is_dir {
        return Err(PipelineError::MissingArtifact(dir.to_path_buf()));
    }

    let mut images = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();

        let has_image_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(is_image_extension);
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        match grammar.ordinal_of(name) {
            Some(ordinal) if has_image_extension => images.push(ImageAsset { ordinal, path }),
            _ => debug!(path = %path.display(), "ignoring non-ordinal file"),
        }
    }

    images.sort_by(|left, right| {
        left.ordinal
            .cmp(&right.ordinal)
            .then_with(|| left.path.cmp(&right.path))
    });
    images.dedup_by(|later, earlier| {
        let duplicate = later.ordinal == earlier.ordinal;
        if duplicate {
            warn!(ordinal = later.ordinal, path = %later.path.display(), "duplicate image ordinal ignored");
        }
        duplicate
    });

    Ok(images)
}

/// Points every detected reference at the next unused image, in document order. A document with
/// no reference gets one after each line naming a figure until the images run out.
pub fn reconcile(markdown: &str, images: &[ImageAsset], grammar: &ReferenceGrammar) -> Reconciliation {
    let references = grammar.scan(markdown);
    if references.is_empty() {
        return insert_by_keywords(markdown, images);
    }

    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    for (reference, image) in references.iter().zip(images) {
        if let Some(edit) = rewrite(markdown, reference, image) {
            edits.push(edit);
        }
    }

    let unmatched_references = references.len().saturating_sub(images.len());
    let unreferenced_images = images.len().saturating_sub(references.len());

    if unmatched_references > 0 {
        warn!(
            references = references.len(),
            images = images.len(),
            "more image references than images, leaving the rest untouched"
        );
    }
    if unreferenced_images > 0 {
        info!(unreferenced_images, "some images are not referenced in the markdown");
    }

    let corrections = edits.len();
    let mut output = markdown.to_string();
    for (range, replacement) in edits.into_iter().rev() {
        output.replace_range(range, &replacement);
    }

    Reconciliation {
        markdown: output,
        corrections,
        references: references.len(),
        synthesized: 0,
        unmatched_references,
        unreferenced_images,
    }
}

fn rewrite(markdown: &str, reference: &ImageReference, image: &ImageAsset) -> Option<(Range<usize>, String)> {
    let target = relative_image_target(&image.file_name());

    match &reference.target_span {
        Some(span) if markdown[span.clone()] == target => None,
        Some(span) => Some((span.clone(), target)),
        None => Some((
            reference.span.clone(),
            format!("![image{}]({target})", image.ordinal),
        )),
    }
}

fn insert_by_keywords(markdown: &str, images: &[ImageAsset]) -> Reconciliation {
    let mut output = String::with_capacity(markdown.len());
    let mut pending = images.iter();
    let mut synthesized = 0;

    for line in markdown.split_inclusive('\n') {
        output.push_str(line);

        let lowered = line.to_lowercase();
        if !FIGURE_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            continue;
        }
        let Some(image) = pending.next() else {
            continue;
        };

        if !line.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!(
            "![image{}]({})\n",
            image.ordinal,
            relative_image_target(&image.file_name())
        ));
        synthesized += 1;
    }

    if synthesized > 0 {
        info!(synthesized, "no image references found, inserted references after figure mentions");
    }

    Reconciliation {
        markdown: output,
        corrections: synthesized,
        references: 0,
        synthesized,
        unmatched_references: 0,
        unreferenced_images: images.len() - synthesized,
    }
}
