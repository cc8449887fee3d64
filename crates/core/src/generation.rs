use crate::embeddings::Embedder;
use crate::error::RetrievalError;
use crate::models::RetrievedChunk;
use crate::retrieval::RetrievalSession;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

const ANSWER_FIELDS: [&str; 3] = ["respuesta", "response", "answer"];

pub fn assemble_prompt(chunks: &[RetrievedChunk], question: &str) -> String {
    let context = chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Contesta la siguiente pregunta utilizando el contexto del documento y tu conocimiento especializado.\n\n\
         ### Contexto:\n{context}\n\n\
         ### Pregunta:\n{question}\n\n\
         ### Respuesta:"
    )
    .trim()
    .to_string()
}

#[async_trait]
pub trait Generator {
    async fn generate(&self, instruction: &str) -> Result<Value, RetrievalError>;
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

pub struct HttpGenerator {
    client: Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpGenerator {
    pub fn new(settings: &GenerationSettings) -> Result<Self, RetrievalError> {
        url::Url::parse(&settings.endpoint)?;
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            auth_token: settings.auth_token.clone(),
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, instruction: &str) -> Result<Value, RetrievalError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "instruction": instruction }));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(RetrievalError::Generation {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

pub fn answer_text(reply: &Value) -> String {
    ANSWER_FIELDS
        .iter()
        .find_map(|field| reply.get(field).and_then(Value::as_str))
        .map(str::to_string)
        .or_else(|| reply.as_str().map(str::to_string))
        .unwrap_or_else(|| serde_json::to_string_pretty(reply).unwrap_or_else(|_| reply.to_string()))
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub chunks: Vec<RetrievedChunk>,
    pub prompt: String,
    pub response: Value,
}

pub struct RagAssistant<E: Embedder, G: Generator> {
    session: RetrievalSession<E>,
    generator: G,
    top_k: usize,
}

impl<E, G> RagAssistant<E, G>
where
    E: Embedder,
    G: Generator + Send + Sync,
{
    pub fn new(session: RetrievalSession<E>, generator: G, top_k: usize) -> Self {
        Self {
            session,
            generator,
            top_k,
        }
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, RetrievalError> {
        if question.trim().is_empty() {
            return Err(RetrievalError::Request("question is empty".to_string()));
        }

        let chunks = self.session.retrieve(question, self.top_k).await?;
        let prompt = assemble_prompt(&chunks, question);
        info!(chunks = chunks.len(), prompt_chars = prompt.chars().count(), "requesting answer");
        let response = self.generator.generate(&prompt).await?;

        Ok(Answer {
            question: question.to_string(),
            chunks,
            prompt,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::test_support::serve;
    use std::sync::Mutex;

    fn chunk(index: usize, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            index,
            distance: 0.0,
            text: text.to_string(),
        }
    }

    #[test]
    fn prompt_keeps_rank_order() {
        let prompt = assemble_prompt(&[chunk(4, "segundo"), chunk(1, "primero")], "¿Qué?");

        assert!(prompt.starts_with("Contesta la siguiente pregunta"));
        assert!(prompt.contains("### Contexto:\nsegundo\n\nprimero\n\n### Pregunta:\n¿Qué?"));
        assert!(prompt.ends_with("### Respuesta:"));
    }

    #[test]
    fn answer_text_prefers_known_fields() {
        assert_eq!(answer_text(&json!({"respuesta": "sí", "x": 1})), "sí");
        assert_eq!(answer_text(&json!({"response": "yes"})), "yes");
        assert_eq!(answer_text(&json!("plain")), "plain");
        assert!(answer_text(&json!({"other": 1})).contains("\"other\""));
    }

    #[test]
    fn generator_rejects_malformed_endpoint() {
        let settings = GenerationSettings {
            endpoint: "not a url".to_string(),
            auth_token: None,
            timeout: DEFAULT_GENERATION_TIMEOUT,
        };
        assert!(matches!(
            HttpGenerator::new(&settings),
            Err(RetrievalError::Url(_))
        ));
    }

    #[derive(Default)]
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(&self, instruction: &str) -> Result<Value, RetrievalError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(instruction.to_string());
            }
            Ok(json!({ "respuesta": "La mirada desvía la atención." }))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _instruction: &str) -> Result<Value, RetrievalError> {
            Err(RetrievalError::Generation {
                status: 401,
                body: "unauthorized".to_string(),
            })
        }
    }

    async fn session() -> Result<RetrievalSession<CharacterNgramEmbedder>, RetrievalError> {
        RetrievalSession::build(
            "La mirada antes del pase secreto.\n\nEl público sigue la mano que se mueve.",
            ChunkingConfig { max_chars: 20 },
            CharacterNgramEmbedder::default(),
        )
        .await
    }

    #[tokio::test]
    async fn ask_sends_retrieved_context() -> Result<(), RetrievalError> {
        let assistant = RagAssistant::new(session().await?, RecordingGenerator::default(), 1);
        let answer = assistant.ask("La mirada antes del pase secreto.").await?;

        assert_eq!(answer.chunks.len(), 1);
        assert_eq!(answer.chunks[0].index, 0);
        assert_eq!(answer_text(&answer.response), "La mirada desvía la atención.");
        assert!(answer.prompt.contains("La mirada antes del pase secreto."));
        Ok(())
    }

    #[tokio::test]
    async fn generation_errors_are_propagated() -> Result<(), RetrievalError> {
        let assistant = RagAssistant::new(session().await?, FailingGenerator, 3);
        let result = assistant.ask("¿Qué hace la mano?").await;

        assert!(matches!(
            result,
            Err(RetrievalError::Generation { status: 401, .. })
        ));
        Ok(())
    }

    fn http_generator(endpoint: String) -> Result<HttpGenerator, RetrievalError> {
        HttpGenerator::new(&GenerationSettings {
            endpoint,
            auth_token: Some("secret-token".to_string()),
            timeout: DEFAULT_GENERATION_TIMEOUT,
        })
    }

    #[tokio::test]
    async fn instruction_is_posted_as_json() -> Result<(), Box<dyn std::error::Error>> {
        let (base_url, server) = serve(vec![(200, r#"{"respuesta": "Con la mirada."}"#.to_string())]).await?;
        let generator = http_generator(format!("{base_url}/generate"))?;

        let reply = generator.generate("### Pregunta:\n¿Cómo?").await?;
        assert_eq!(answer_text(&reply), "Con la mirada.");

        let requests = server.await??;
        let request = &requests[0];
        assert_eq!(request.request_line(), "POST /generate HTTP/1.1");
        assert_eq!(request.header("authorization"), Some("Bearer secret-token"));
        assert_eq!(request.header("content-type"), Some("application/json"));

        let body: Value = serde_json::from_slice(&request.body)?;
        assert_eq!(body, json!({ "instruction": "### Pregunta:\n¿Cómo?" }));
        Ok(())
    }

    #[tokio::test]
    async fn server_errors_map_to_generation_errors() -> Result<(), Box<dyn std::error::Error>> {
        let (base_url, server) = serve(vec![(500, "internal".to_string())]).await?;
        let generator = http_generator(format!("{base_url}/generate"))?;

        let result = generator.generate("hola").await;
        assert!(matches!(
            result,
            Err(RetrievalError::Generation { status: 500, ref body }) if body == "internal"
        ));
        server.await??;
        Ok(())
    }

    #[tokio::test]
    async fn garbage_success_bodies_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let (base_url, server) = serve(vec![(200, "<html>oops".to_string())]).await?;
        let generator = http_generator(format!("{base_url}/generate"))?;

        let result = generator.generate("hola").await;
        assert!(matches!(result, Err(RetrievalError::Serialization(_))));
        server.await??;
        Ok(())
    }
}
