pub mod caption;
pub mod chunking;
pub mod converter;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod health;
pub mod layout;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod references;
pub mod retrieval;
pub mod splice;

#[cfg(test)]
mod test_support;

pub use caption::{
    caption_images, extract_caption, load_captions, write_caption_artifact, CaptionOutcome,
    CaptionSettings, Captioner, HttpCaptioner, DEFAULT_CAPTION_PROMPT, DEFAULT_CAPTION_TIMEOUT,
};
pub use chunking::{chunk_markdown, normalize_whitespace, ChunkingConfig, DEFAULT_CHUNK_MAX_CHARS};
pub use converter::{normalize_layout, ConvertedDocument, DoclingConverter, DocumentConverter};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingSettings, OpenAiEmbedder, DEFAULT_EMBEDDING_API_URL,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
};
pub use error::{CaptionError, PipelineError, RetrievalError};
pub use generation::{
    answer_text, assemble_prompt, Answer, GenerationSettings, Generator, HttpGenerator,
    RagAssistant, DEFAULT_GENERATION_TIMEOUT,
};
pub use health::{health_url, probe_health};
pub use layout::{latest_artifacts, ArtifactLayout};
pub use models::{
    Caption, CaptionFailure, Chunk, ImageAsset, ImageReference, ReferenceKind, RetrievedChunk,
    RunManifest, RunReport,
};
pub use pipeline::{DocumentPipeline, PipelineConfig};
pub use reconcile::{list_images, reconcile, Reconciliation};
pub use references::ReferenceGrammar;
pub use retrieval::{FlatIndex, RetrievalSession, DEFAULT_TOP_K};
pub use splice::{splice, Splice};
