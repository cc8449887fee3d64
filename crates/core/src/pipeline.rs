use crate::caption::{caption_images, load_captions, Captioner, DEFAULT_CAPTION_PROMPT};
use crate::converter::{ConvertedDocument, DocumentConverter};
use crate::error::{PipelineError, Result};
use crate::layout::ArtifactLayout;
use crate::models::{ImageAsset, RunManifest, RunReport};
use crate::reconcile::{list_images, reconcile};
use crate::references::ReferenceGrammar;
use crate::splice::splice;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub prompt: String,
    pub caption_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_CAPTION_PROMPT.to_string(),
            caption_concurrency: 1,
        }
    }
}

pub struct DocumentPipeline<C, P>
where
    C: DocumentConverter,
    P: Captioner,
{
    converter: C,
    captioner: P,
    grammar: ReferenceGrammar,
    config: PipelineConfig,
}

impl<C, P> DocumentPipeline<C, P>
where
    C: DocumentConverter + Send + Sync,
    P: Captioner + Send + Sync,
{
    pub fn new(converter: C, captioner: P, config: PipelineConfig) -> Result<Self> {
        Ok(Self {
            converter,
            captioner,
            grammar: ReferenceGrammar::new()?,
            config,
        })
    }

    pub async fn convert(&self, pdf: &Path, layout: &ArtifactLayout) -> Result<ConvertedDocument> {
        fs::create_dir_all(&layout.root).await?;
        self.converter.convert(pdf, layout).await
    }

    pub async fn process(&self, pdf: &Path, layout: &ArtifactLayout) -> Result<RunReport> {
        let started_at = Utc::now();
        info!(pdf = %pdf.display(), run = %layout.root.display(), "processing document");

        let converted = self.convert(pdf, layout).await?;
        info!(images = converted.image_count, "document converted");

        let images = list_images(&layout.images_dir(), &self.grammar).await?;
        let mut report = self.reconcile_in_place(layout, &images).await?;

        let outcome = caption_images(
            &self.captioner,
            &images,
            &self.config.prompt,
            &layout.descriptions_dir(),
            self.config.caption_concurrency,
        )
        .await?;
        report.captioned = outcome.captions.len();
        report.failed = outcome.failures;
        info!(captioned = report.captioned, images = report.images, "images described");

        self.splice_into_final(layout, &mut report).await?;
        write_manifest(layout, pdf, started_at, &report).await?;
        Ok(report)
    }

    pub async fn insert_descriptions(&self, layout: &ArtifactLayout) -> Result<RunReport> {
        let images = list_images(&layout.images_dir(), &self.grammar).await?;
        let mut report = self.reconcile_in_place(layout, &images).await?;
        self.splice_into_final(layout, &mut report).await?;
        Ok(report)
    }

    async fn reconcile_in_place(&self, layout: &ArtifactLayout, images: &[ImageAsset]) -> Result<RunReport> {
        let markdown_path = layout.markdown();
        let markdown = match fs::read_to_string(&markdown_path).await {
            Ok(markdown) => markdown,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::MissingArtifact(markdown_path));
            }
            Err(error) => return Err(error.into()),
        };

        let reconciled = reconcile(&markdown, images, &self.grammar);
        if reconciled.markdown != markdown {
            fs::write(&markdown_path, &reconciled.markdown).await?;
        }
        info!(
            corrections = reconciled.corrections,
            references = reconciled.references,
            synthesized = reconciled.synthesized,
            "image references reconciled"
        );

        Ok(RunReport {
            images: images.len(),
            corrections: reconciled.corrections,
            ..RunReport::default()
        })
    }

    async fn splice_into_final(&self, layout: &ArtifactLayout, report: &mut RunReport) -> Result<()> {
        let captions = load_captions(&layout.descriptions_dir(), &self.grammar).await?;
        let markdown = fs::read_to_string(layout.markdown()).await?;
        let spliced = splice(&markdown, &captions, &self.grammar);

        fs::write(layout.final_markdown(), &spliced.markdown).await?;
        if spliced.missing > 0 {
            warn!(missing = spliced.missing, "some references have no description");
        }
        info!(
            replaced = spliced.replaced,
            path = %layout.final_markdown().display(),
            "descriptions inserted"
        );

        report.replaced = spliced.replaced;
        report.missing = spliced.missing;
        Ok(())
    }
}

pub async fn digest_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

async fn write_manifest(
    layout: &ArtifactLayout,
    pdf: &Path,
    started_at: chrono::DateTime<Utc>,
    report: &RunReport,
) -> Result<()> {
    let manifest = RunManifest {
        source_path: pdf.to_string_lossy().to_string(),
        source_sha256: digest_file(pdf).await?,
        started_at,
        finished_at: Utc::now(),
        report: report.clone(),
    };
    fs::write(layout.manifest(), serde_json::to_string_pretty(&manifest)?).await?;
    Ok(())
}
