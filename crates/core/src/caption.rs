use crate::error::{CaptionError, PipelineError};
use crate::models::{Caption, CaptionFailure, ImageAsset};
use crate::references::ReferenceGrammar;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

pub const DEFAULT_CAPTION_PROMPT: &str = "Las imágenes se basan en una situación de una actuación de magia e ilusionismo. Quiero que describas lo que ves, haciendo hincapié en flechas, hacia dónde se dirigen, qué hacen o qué intención quiere aportar la imagen.";
pub const DEFAULT_CAPTION_TIMEOUT: Duration = Duration::from_secs(60);

const DESCRIPTION_MARKER: &str = "**Descripción:**";
const ERROR_BODY_PREVIEW: usize = 300;

#[async_trait]
pub trait Captioner {
    async fn describe(&self, image: &ImageAsset, prompt: &str) -> Result<String, CaptionError>;
}

#[derive(Debug, Clone)]
pub struct CaptionSettings {
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

impl CaptionSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: None,
            timeout: DEFAULT_CAPTION_TIMEOUT,
        }
    }
}

pub struct HttpCaptioner {
    client: Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpCaptioner {
    pub fn new(settings: &CaptionSettings) -> Result<Self, CaptionError> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            auth_token: settings.auth_token.clone(),
        })
    }
}

#[async_trait]
impl Captioner for HttpCaptioner {
    async fn describe(&self, image: &ImageAsset, prompt: &str) -> Result<String, CaptionError> {
        let bytes = fs::read(&image.path).await?;
        let part = Part::bytes(bytes)
            .file_name(image.file_name())
            .mime_str(mime_for_extension(&image.extension()))?;
        let form = Form::new()
            .part("image", part)
            .text("text", prompt.to_string())
            .text("prompt", prompt.to_string());

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(CaptionError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_PREVIEW).collect(),
            });
        }

        extract_caption(&body).ok_or(CaptionError::Empty)
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "image/png",
    }
}

/// `response` field, then the first other string field except `error`, then a JSON string,
/// then the raw body.
pub fn extract_caption(body: &str) -> Option<String> {
    let trimmed = body.trim();

    let caption = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(fields)) => {
            let response = fields
                .get("response")
                .and_then(Value::as_str)
                .filter(|text| !text.trim().is_empty());
            let first_string = fields
                .iter()
                .filter(|(key, _)| key.as_str() != "error")
                .find_map(|(key, value)| {
                    value
                        .as_str()
                        .filter(|text| !text.trim().is_empty())
                        .map(|text| (key, text))
                });

            if let Some(text) = response {
                text.to_string()
            } else if let Some((key, text)) = first_string {
                debug!(field = %key, "caption taken from first string field");
                text.to_string()
            } else if fields.contains_key("error") || fields.contains_key("response") {
                return None;
            } else {
                trimmed.to_string()
            }
        }
        Ok(Value::String(text)) => text,
        _ => trimmed.to_string(),
    };

    let caption = caption.trim();
    if caption.is_empty() {
        None
    } else {
        Some(caption.to_string())
    }
}

pub fn render_caption_artifact(caption: &Caption) -> String {
    format!(
        "# Descripción de image{}\n\n**Imagen:** {}\n\n{DESCRIPTION_MARKER}\n\n{}\n",
        caption.ordinal,
        caption.image_path.display(),
        caption.text
    )
}

pub fn parse_caption_artifact(contents: &str) -> Option<String> {
    let (_, body) = contents.split_once(DESCRIPTION_MARKER)?;
    let body = body.trim();
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

pub async fn write_caption_artifact(dir: &Path, caption: &Caption) -> Result<PathBuf, PipelineError> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(format!("image{}.md", caption.ordinal));
    fs::write(&path, render_caption_artifact(caption)).await?;
    Ok(path)
}

pub async fn load_captions(
    dir: &Path,
    grammar: &ReferenceGrammar,
) -> Result<BTreeMap<u32, String>, PipelineError> {
    let mut captions = BTreeMap::new();
    let is_dir = fs::metadata(dir).await.is_ok_and(|metadata| metadata.is_dir());
    if !is_dir {
        warn!(dir = %dir.display(), "no image descriptions directory");
        return Ok(captions);
    }

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_markdown = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
        if !is_markdown {
            continue;
        }

        let Some(ordinal) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| grammar.ordinal_of(&format!("{stem}.png")))
        else {
            continue;
        };

        match parse_caption_artifact(&fs::read_to_string(&path).await?) {
            Some(text) => {
                captions.insert(ordinal, text);
            }
            None => warn!(path = %path.display(), "description file has no description body"),
        }
    }

    Ok(captions)
}

#[derive(Debug, Default)]
pub struct CaptionOutcome {
    pub captions: Vec<Caption>,
    pub failures: Vec<CaptionFailure>,
}

/// Describes every image with at most `concurrency` requests in flight. Results come back in
/// ordinal order; a failed image is recorded and skipped.
pub async fn caption_images<C>(
    captioner: &C,
    images: &[ImageAsset],
    prompt: &str,
    descriptions_dir: &Path,
    concurrency: usize,
) -> Result<CaptionOutcome, PipelineError>
where
    C: Captioner + Sync + ?Sized,
{
    fs::create_dir_all(descriptions_dir).await?;
    let mut outcome = CaptionOutcome::default();

    let mut results = stream::iter(images.iter().map(|image| async move {
        info!(ordinal = image.ordinal, path = %image.path.display(), "describing image");
        (image, captioner.describe(image, prompt).await)
    }))
    .buffered(concurrency.max(1));

    while let Some((image, result)) = results.next().await {
        let text = match result {
            Ok(text) => text,
            Err(error) => {
                warn!(ordinal = image.ordinal, error = %error, "could not describe image");
                outcome.failures.push(CaptionFailure {
                    ordinal: image.ordinal,
                    reason: error.to_string(),
                });
                continue;
            }
        };

        let caption = Caption {
            ordinal: image.ordinal,
            image_path: image.path.clone(),
            text,
        };
        match write_caption_artifact(descriptions_dir, &caption).await {
            Ok(path) => {
                info!(ordinal = image.ordinal, path = %path.display(), "description saved");
                outcome.captions.push(caption);
            }
            Err(error) => {
                warn!(ordinal = image.ordinal, error = %error, "could not save description");
                outcome.failures.push(CaptionFailure {
                    ordinal: image.ordinal,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(outcome)
}
