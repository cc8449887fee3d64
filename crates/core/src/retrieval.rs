use crate::chunking::{chunk_markdown, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::RetrievalError;
use crate::models::{Chunk, RetrievedChunk};
use tracing::info;

pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimensions: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn add(&mut self, vector: Vec<f32>) -> Result<usize, RetrievalError> {
        self.check_dimensions(&vector)?;
        self.vectors.push(vector);
        Ok(self.vectors.len() - 1)
    }

    /// The `k` nearest vectors as `(index, squared distance)`, ties broken by lower index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, RetrievalError> {
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimensions(query)?;

        let mut scored = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, vector)| (index, squared_distance(vector, query)))
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| left.1.total_cmp(&right.1).then(left.0.cmp(&right.0)));
        scored.truncate(k);
        Ok(scored)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), RetrievalError> {
        if vector.len() != self.dimensions {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn squared_distance(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

pub struct RetrievalSession<E: Embedder> {
    embedder: E,
    chunks: Vec<Chunk>,
    index: FlatIndex,
}

impl<E: Embedder> RetrievalSession<E> {
    pub async fn build(markdown: &str, config: ChunkingConfig, embedder: E) -> Result<Self, RetrievalError> {
        let chunks = chunk_markdown(markdown, config);
        let texts = chunks.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RetrievalError::Request(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let dimensions = vectors.first().map(Vec::len).unwrap_or_default();
        let mut index = FlatIndex::new(dimensions);
        for vector in vectors {
            index.add(vector)?;
        }

        info!(chunks = index.len(), dimensions, "retrieval index built");
        Ok(Self {
            embedder,
            chunks,
            index,
        })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        if self.index.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query).await?;
        let hits = self.index.search(&query_vector, top_k)?;

        Ok(hits
            .into_iter()
            .filter_map(|(index, distance)| {
                self.chunks.get(index).map(|chunk| RetrievedChunk {
                    index,
                    distance,
                    text: chunk.text.clone(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;

    #[test]
    fn empty_index_returns_nothing() -> Result<(), RetrievalError> {
        let index = FlatIndex::new(4);
        assert!(index.search(&[0.0; 4], 3)?.is_empty());
        Ok(())
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = FlatIndex::new(2);
        assert!(matches!(
            index.add(vec![1.0, 2.0, 3.0]),
            Err(RetrievalError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn ties_are_broken_by_sequence_index() -> Result<(), RetrievalError> {
        let mut index = FlatIndex::new(2);
        index.add(vec![1.0, 0.0])?;
        index.add(vec![0.0, 1.0])?;
        index.add(vec![1.0, 0.0])?;
        index.add(vec![5.0, 5.0])?;

        let hits = index.search(&[1.0, 0.0], 3)?;
        let order = hits.iter().map(|(index, _)| *index).collect::<Vec<_>>();
        assert_eq!(order, vec![0, 2, 1]);
        assert_eq!(hits[0].1, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn identical_query_ranks_its_chunk_first() -> Result<(), RetrievalError> {
        let markdown = "La mirada del mago dirige la atención del público hacia la mano equivocada.\n\n\
                        El pase secreto se ejecuta mientras los espectadores siguen la mirada.\n\n\
                        Una idea obnubilante ocupa la mente del espectador durante el truco.";
        let session = RetrievalSession::build(
            markdown,
            ChunkingConfig { max_chars: 80 },
            CharacterNgramEmbedder::default(),
        )
        .await?;
        assert_eq!(session.chunks().len(), 3);

        let target = session.chunks()[1].text.clone();
        let hits = session.retrieve(&target, DEFAULT_TOP_K).await?;

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].index, 1);
        assert!(hits[0].distance.abs() < 1e-6);
        Ok(())
    }

    #[tokio::test]
    async fn empty_document_retrieves_nothing() -> Result<(), RetrievalError> {
        let session = RetrievalSession::build(
            "  \n\n ",
            ChunkingConfig::default(),
            CharacterNgramEmbedder::default(),
        )
        .await?;

        assert!(session.chunks().is_empty());
        assert!(session.retrieve("¿Qué hace el mago?", 3).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn boxed_embedders_can_back_a_session() -> Result<(), RetrievalError> {
        let embedder: Box<dyn Embedder> = Box::new(CharacterNgramEmbedder { dimensions: 64 });
        let session = RetrievalSession::build(
            "El conejo sale del sombrero.\n\nLa carta cambia de color.",
            ChunkingConfig { max_chars: 10 },
            embedder,
        )
        .await?;

        let hits = session.retrieve("La carta cambia de color.", 1).await?;
        assert_eq!(hits[0].index, 1);
        Ok(())
    }
}
