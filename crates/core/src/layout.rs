use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

pub const MARKDOWN_FILE: &str = "texto.md";
pub const FINAL_MARKDOWN_FILE: &str = "texto_final.md";
pub const IMAGES_DIR: &str = "imagenes_extraidas";
pub const DESCRIPTIONS_DIR: &str = "image_descriptions";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const RUN_DIR_PREFIX: &str = "artifacts_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn timestamped(parent: &Path, now: DateTime<Local>) -> Self {
        Self::new(parent.join(format!(
            "{RUN_DIR_PREFIX}{}",
            now.format("%Y%m%d_%H%M%S")
        )))
    }

    pub fn markdown(&self) -> PathBuf {
        self.root.join(MARKDOWN_FILE)
    }

    pub fn final_markdown(&self) -> PathBuf {
        self.root.join(FINAL_MARKDOWN_FILE)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    pub fn descriptions_dir(&self) -> PathBuf {
        self.root.join(DESCRIPTIONS_DIR)
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn description_for(&self, ordinal: u32) -> PathBuf {
        self.descriptions_dir().join(format!("image{ordinal}.md"))
    }
}

pub fn relative_image_target(file_name: &str) -> String {
    format!("{IMAGES_DIR}/{file_name}")
}

pub fn latest_artifacts(parent: &Path) -> std::io::Result<Option<ArtifactLayout>> {
    let mut runs = fs::read_dir(parent)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(RUN_DIR_PREFIX))
        })
        .map(|entry| entry.path())
        .collect::<Vec<_>>();

    runs.sort_unstable();
    Ok(runs.pop().map(ArtifactLayout::new))
}
