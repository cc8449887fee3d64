use anyhow::{bail, Context};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use illusion_corpus_core::{
    answer_text, health_url, latest_artifacts, probe_health, ArtifactLayout, CaptionSettings,
    Captioner, CharacterNgramEmbedder, ChunkingConfig, DoclingConverter, DocumentPipeline,
    Embedder, EmbeddingSettings, GenerationSettings, HttpCaptioner, HttpGenerator, ImageAsset,
    OpenAiEmbedder, PipelineConfig, RagAssistant, ReferenceGrammar, RetrievalSession, RunReport,
    DEFAULT_CAPTION_PROMPT, DEFAULT_EMBEDDING_API_URL, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_GENERATION_TIMEOUT,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "illusion-corpus", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Image analysis endpoint that receives multipart image uploads
    #[arg(long, env = "API_URL", default_value = "http://localhost:5000/analyze")]
    api_url: String,

    /// Bearer token for the analysis and generation endpoints
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Text generation endpoint used to answer questions
    #[arg(long, env = "GENERATION_API_URL", default_value = "http://localhost:8000/generate")]
    generation_url: String,

    /// Prompt sent with every image
    #[arg(long, env = "CAPTION_PROMPT")]
    prompt: Option<String>,

    /// Per-image request timeout in seconds
    #[arg(long, env = "CAPTION_TIMEOUT_SECS", default_value_t = 60)]
    caption_timeout_secs: u64,

    /// Images described concurrently
    #[arg(long, env = "CAPTION_CONCURRENCY", default_value_t = 1)]
    caption_concurrency: usize,

    /// Converter executable
    #[arg(long, env = "DOCLING_BIN", default_value = "docling")]
    docling_bin: String,

    /// Extra converter argument; repeat for several
    #[arg(long = "docling-arg", allow_hyphen_values = true)]
    docling_args: Vec<String>,

    /// Embedding backend used by ask, search and batch
    #[arg(long, env = "EMBEDDER", value_enum, default_value_t = EmbedderKind::Trigram)]
    embedder: EmbedderKind,

    /// OpenAI-compatible embeddings base URL
    #[arg(long, env = "EMBEDDING_API_URL", default_value = DEFAULT_EMBEDDING_API_URL)]
    embedding_url: String,

    /// Embedding model name
    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    /// Hashed character trigrams, no service needed
    Trigram,
    /// Sentence embeddings from EMBEDDING_API_URL
    Openai,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a PDF to texto.md plus numbered images.
    Convert {
        pdf: PathBuf,
        /// Run directory; a timestamped one is created when omitted.
        output_dir: Option<PathBuf>,
    },
    /// Convert, describe every image and write texto_final.md.
    Process {
        pdf: PathBuf,
        /// Directory that receives the artifacts_<timestamp> run folder.
        #[arg(long, default_value = ".")]
        output_root: PathBuf,
    },
    /// Re-run reconciliation and splicing with descriptions already on disk.
    InsertDescriptions {
        /// Run directory; defaults to the newest artifacts_* folder.
        #[arg(long)]
        from: Option<PathBuf>,
        #[arg(long, default_value = ".")]
        output_root: PathBuf,
    },
    /// Check endpoint and token configuration.
    CheckConfig {
        /// Also call the /health route of each endpoint.
        #[arg(long, default_value_t = false)]
        probe: bool,
    },
    /// Describe a single image and print the caption.
    TestImage { image: PathBuf },
    /// Answer a question from a markdown document.
    Ask {
        #[arg(long)]
        document: PathBuf,
        #[arg(long)]
        question: String,
        #[arg(long, default_value = "3")]
        top_k: usize,
        #[arg(long, default_value = "200")]
        chunk_size: usize,
        /// Print the retrieved chunks before the answer.
        #[arg(long, default_value_t = false)]
        show_context: bool,
    },
    /// Print the chunks closest to a query without generating an answer.
    Search {
        #[arg(long)]
        document: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "3")]
        top_k: usize,
        #[arg(long, default_value = "200")]
        chunk_size: usize,
    },
    /// Answer every question of a file (one per line) and save the results as JSON.
    Batch {
        #[arg(long)]
        document: PathBuf,
        #[arg(long)]
        questions: PathBuf,
        #[arg(long, default_value = "rag_results.json")]
        output: PathBuf,
        #[arg(long, default_value = "3")]
        top_k: usize,
        #[arg(long, default_value = "200")]
        chunk_size: usize,
    },
}

#[derive(Serialize)]
struct BatchResult {
    question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Cli {
    fn caption_settings(&self) -> CaptionSettings {
        CaptionSettings {
            auth_token: self.auth_token.clone(),
            timeout: Duration::from_secs(self.caption_timeout_secs),
            ..CaptionSettings::new(&self.api_url)
        }
    }

    fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            endpoint: self.generation_url.clone(),
            auth_token: self.auth_token.clone(),
            timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    fn prompt(&self) -> String {
        self.prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_CAPTION_PROMPT.to_string())
    }

    fn pipeline(&self) -> anyhow::Result<DocumentPipeline<DoclingConverter, HttpCaptioner>> {
        let captioner = HttpCaptioner::new(&self.caption_settings())?;
        let config = PipelineConfig {
            prompt: self.prompt(),
            caption_concurrency: self.caption_concurrency,
        };
        Ok(DocumentPipeline::new(
            DoclingConverter::new(&self.docling_bin).with_args(self.docling_args.iter().cloned()),
            captioner,
            config,
        )?)
    }

    fn embedder(&self) -> anyhow::Result<Box<dyn Embedder>> {
        Ok(match self.embedder {
            EmbedderKind::Trigram => Box::new(CharacterNgramEmbedder::default()),
            EmbedderKind::Openai => Box::new(OpenAiEmbedder::new(&EmbeddingSettings {
                base_url: self.embedding_url.clone(),
                model: self.embedding_model.clone(),
                auth_token: self.auth_token.clone(),
                ..EmbeddingSettings::default()
            })?),
        })
    }

    async fn load_session(
        &self,
        document: &Path,
        chunk_size: usize,
    ) -> anyhow::Result<RetrievalSession<Box<dyn Embedder>>> {
        let markdown = tokio::fs::read_to_string(document)
            .await
            .with_context(|| format!("unable to read {}", document.display()))?;
        let session = RetrievalSession::build(
            &markdown,
            ChunkingConfig {
                max_chars: chunk_size,
            },
            self.embedder()?,
        )
        .await?;
        info!(
            document = %document.display(),
            chunks = session.chunks().len(),
            embedder = ?self.embedder,
            "document indexed"
        );
        Ok(session)
    }

    async fn assistant(
        &self,
        document: &Path,
        top_k: usize,
        chunk_size: usize,
    ) -> anyhow::Result<RagAssistant<Box<dyn Embedder>, HttpGenerator>> {
        let session = self.load_session(document, chunk_size).await?;
        let generator = HttpGenerator::new(&self.generation_settings())?;
        Ok(RagAssistant::new(session, generator, top_k))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "illusion-corpus boot"
    );

    match &cli.command {
        Command::Convert { pdf, output_dir } => {
            let layout = match output_dir {
                Some(dir) => ArtifactLayout::new(dir),
                None => ArtifactLayout::timestamped(Path::new("."), Local::now()),
            };
            let converted = cli.pipeline()?.convert(pdf, &layout).await?;

            println!("markdown: {}", converted.markdown_path.display());
            println!(
                "{} images in {}",
                converted.image_count,
                converted.images_dir.display()
            );
        }
        Command::Process { pdf, output_root } => {
            let layout = ArtifactLayout::timestamped(output_root, Local::now());
            let report = cli.pipeline()?.process(pdf, &layout).await?;

            print_report(&layout, &report);
            if let Some(reason) = report.failure() {
                bail!(reason);
            }
        }
        Command::InsertDescriptions { from, output_root } => {
            let layout = match from {
                Some(dir) => ArtifactLayout::new(dir),
                None => latest_artifacts(output_root)?.with_context(|| {
                    format!("no artifacts_* directory in {}", output_root.display())
                })?,
            };
            let report = cli.pipeline()?.insert_descriptions(&layout).await?;
            print_report(&layout, &report);
        }
        Command::CheckConfig { probe } => check_config(&cli, *probe).await?,
        Command::TestImage { image } => {
            if !image.is_file() {
                bail!("image does not exist: {}", image.display());
            }
            let ordinal = ReferenceGrammar::new()?
                .ordinal_of(&image.to_string_lossy())
                .unwrap_or(1);
            let asset = ImageAsset {
                ordinal,
                path: image.clone(),
            };

            let captioner = HttpCaptioner::new(&cli.caption_settings())?;
            let caption = captioner.describe(&asset, &cli.prompt()).await?;
            println!("{caption}");
        }
        Command::Ask {
            document,
            question,
            top_k,
            chunk_size,
            show_context,
        } => {
            let assistant = cli.assistant(document, *top_k, *chunk_size).await?;
            let answer = assistant.ask(question).await?;

            if *show_context {
                for chunk in &answer.chunks {
                    println!(
                        "[chunk {}] distance={:.4}\n{}\n",
                        chunk.index, chunk.distance, chunk.text
                    );
                }
            }
            println!("{}", answer_text(&answer.response));
        }
        Command::Search {
            document,
            query,
            top_k,
            chunk_size,
        } => {
            let session = cli.load_session(document, *chunk_size).await?;

            println!("query: {query}");
            for hit in session.retrieve(query, *top_k).await? {
                println!(
                    "[chunk {}] distance={:.4}\n{}\n",
                    hit.index, hit.distance, hit.text
                );
            }
        }
        Command::Batch {
            document,
            questions,
            output,
            top_k,
            chunk_size,
        } => {
            let assistant = cli.assistant(document, *top_k, *chunk_size).await?;
            let questions = tokio::fs::read_to_string(questions)
                .await
                .with_context(|| format!("unable to read {}", questions.display()))?;

            let mut results = Vec::new();
            for (position, question) in questions
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .enumerate()
            {
                println!("question {}: {question}", position + 1);
                let result = match assistant.ask(question).await {
                    Ok(answer) => {
                        let text = answer_text(&answer.response);
                        println!("answer: {text}\n");
                        BatchResult {
                            question: question.to_string(),
                            answer: Some(text),
                            error: None,
                        }
                    }
                    Err(error) => {
                        warn!(question, error = %error, "question failed");
                        BatchResult {
                            question: question.to_string(),
                            answer: None,
                            error: Some(error.to_string()),
                        }
                    }
                };
                results.push(result);
            }

            tokio::fs::write(output, serde_json::to_string_pretty(&results)?).await?;
            println!("{} results saved to {}", results.len(), output.display());
        }
    }

    Ok(())
}

async fn check_config(cli: &Cli, probe: bool) -> anyhow::Result<()> {
    let mut problems = Vec::new();

    let endpoints = [
        ("API_URL", &cli.api_url),
        ("GENERATION_API_URL", &cli.generation_url),
    ];
    for (name, endpoint) in endpoints {
        match health_url(endpoint) {
            Ok(_) => println!("{name}: {endpoint}"),
            Err(error) => problems.push(format!("{name} is not a usable URL: {error}")),
        }
    }

    match cli.auth_token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => {
            println!("AUTH_TOKEN: set ({} chars)", token.chars().count())
        }
        _ => problems.push("AUTH_TOKEN is not set".to_string()),
    }

    if probe && problems.is_empty() {
        for (_, endpoint) in endpoints {
            match probe_health(endpoint, cli.auth_token.as_deref()).await {
                Ok(status) if (200..300).contains(&status) => {
                    println!("{endpoint}: healthy ({status})")
                }
                Ok(status) => problems.push(format!("{endpoint}: health check returned {status}")),
                Err(error) => problems.push(format!("{endpoint}: unreachable ({error})")),
            }
        }
    }

    if !problems.is_empty() {
        for problem in &problems {
            println!("problem: {problem}");
        }
        bail!("configuration has {} problem(s)", problems.len());
    }

    println!("configuration ok");
    Ok(())
}

fn print_report(layout: &ArtifactLayout, report: &RunReport) {
    println!("run directory: {}", layout.root.display());
    println!(
        "images: {} described: {} failed: {}",
        report.images,
        report.captioned,
        report.failed.len()
    );
    for failure in &report.failed {
        println!("  image{}: {}", failure.ordinal, failure.reason);
    }
    println!(
        "references corrected: {} replaced: {} without description: {}",
        report.corrections, report.replaced, report.missing
    );
    println!("  - {}", layout.markdown().display());
    println!("  - {}", layout.final_markdown().display());
    println!("  - {}", layout.images_dir().display());
    println!("  - {}", layout.descriptions_dir().display());
}
