use crate::error::{PipelineError, Result};
use crate::layout::ArtifactLayout;
use async_trait::async_trait;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedDocument {
    pub markdown_path: PathBuf,
    pub images_dir: PathBuf,
    pub image_count: usize,
}

#[async_trait]
pub trait DocumentConverter {
    async fn convert(&self, pdf: &Path, layout: &ArtifactLayout) -> Result<ConvertedDocument>;
}

#[derive(Debug, Clone)]
pub struct DoclingConverter {
    pub program: String,
    pub extra_args: Vec<String>,
}

impl Default for DoclingConverter {
    fn default() -> Self {
        Self {
            program: "docling".to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl DoclingConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    fn command(&self, pdf: &Path, images_dir: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(pdf)
            .args(["--from", "pdf", "--to", "md", "--image-export-mode", "referenced"])
            .arg("--output")
            .arg(images_dir)
            .args(&self.extra_args);
        command
    }
}

#[async_trait]
impl DocumentConverter for DoclingConverter {
    async fn convert(&self, pdf: &Path, layout: &ArtifactLayout) -> Result<ConvertedDocument> {
        let is_file = tokio::fs::metadata(pdf).await.is_ok_and(|metadata| metadata.is_file());
        if !is_file {
            return Err(PipelineError::InvalidArgument(format!(
                "pdf file does not exist: {}",
                pdf.display()
            )));
        }

        let images_dir = layout.images_dir();
        tokio::fs::create_dir_all(&images_dir).await?;
        info!(program = %self.program, pdf = %pdf.display(), output = %images_dir.display(), "running converter");

        let output = match self.command(pdf, &images_dir).output().await {
            Ok(output) => output,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::ConverterNotFound {
                    program: self.program.clone(),
                });
            }
            Err(error) => return Err(PipelineError::Io(error)),
        };

        if !output.status.success() {
            return Err(PipelineError::ConverterFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(stdout = %String::from_utf8_lossy(&output.stdout), "converter finished");

        let layout = layout.clone();
        tokio::task::spawn_blocking(move || normalize_layout(&layout))
            .await
            .map_err(|error| PipelineError::Io(std::io::Error::other(error)))?
    }
}

/// Renames extracted PNGs to `image<N>.png` in path order and moves the first markdown file to
/// `texto.md`.
pub fn normalize_layout(layout: &ArtifactLayout) -> Result<ConvertedDocument> {
    let images_dir = layout.images_dir();
    if !images_dir.is_dir() {
        return Err(PipelineError::MissingArtifact(images_dir));
    }

    let mut pngs = files_with_extension(&images_dir, "png");
    pngs.sort();

    // Two passes so a source already called `image2.png` is never overwritten by another rename.
    let mut staged = Vec::with_capacity(pngs.len());
    for (position, source) in pngs.iter().enumerate() {
        let temporary = images_dir.join(format!(".renaming-{}.png", position + 1));
        fs::rename(source, &temporary)?;
        staged.push(temporary);
    }
    for (position, temporary) in staged.iter().enumerate() {
        let target = images_dir.join(format!("image{}.png", position + 1));
        fs::rename(temporary, &target)?;
        debug!(from = %pngs[position].display(), to = %target.display(), "image renamed");
    }

    let markdown_path = layout.markdown();
    let mut markdown_files = files_with_extension(&images_dir, "md");
    markdown_files.sort();
    match markdown_files.first() {
        Some(source) => {
            fs::rename(source, &markdown_path)?;
            info!(from = %source.display(), to = %markdown_path.display(), "markdown moved");
        }
        None if markdown_path.is_file() => {}
        None => return Err(PipelineError::MissingArtifact(markdown_path)),
    }

    remove_empty_dirs(&images_dir);
    info!(images = pngs.len(), "converter output normalised");

    Ok(ConvertedDocument {
        markdown_path,
        images_dir,
        image_count: pngs.len(),
    })
}

fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect()
}

fn remove_empty_dirs(root: &Path) {
    let nested = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.path().to_path_buf())
        .collect::<Vec<_>>();

    for dir in nested {
        let is_empty = fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            if let Err(error) = fs::remove_dir(&dir) {
                warn!(dir = %dir.display(), error = %error, "could not remove empty directory");
            }
        }
    }
}
