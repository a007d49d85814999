//! Content generation seam.
//!
//! Handlers depend on the [`ContentGenerator`] trait, not the HTTP client,
//! so tests can substitute canned content and the model/provider can change
//! without touching handler logic. [`LlmContentGenerator`] is the
//! production implementation on top of the `ai-client` crate.

use ai_client::{LlmClient, LlmError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kernel::error::EngineError;

/// The outline shape the syllabus stage expects back from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyllabusOutline {
    pub chapters: Vec<OutlineChapter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineChapter {
    pub title: String,
    pub topics: Vec<String>,
}

#[async_trait::async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Outline a subject into chapters and topics.
    async fn generate_syllabus(
        &self,
        subject_title: &str,
        guidance: Option<&str>,
    ) -> Result<SyllabusOutline, EngineError>;

    /// Study notes for one topic, as markdown text.
    async fn generate_notes(
        &self,
        subject_title: &str,
        topic_title: &str,
    ) -> Result<String, EngineError>;

    /// Practice questions for one topic.
    async fn generate_questions(
        &self,
        topic_title: &str,
        count: u32,
    ) -> Result<Value, EngineError>;

    /// A chapter test spanning the chapter's topics.
    async fn generate_test(
        &self,
        chapter_title: &str,
        topic_titles: &[String],
        question_count: u32,
    ) -> Result<Value, EngineError>;
}

/// Production generator backed by an OpenAI-compatible API.
pub struct LlmContentGenerator {
    client: LlmClient,
    model: String,
}

impl LlmContentGenerator {
    pub fn new(client: LlmClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

fn generation_error(error: LlmError) -> EngineError {
    EngineError::Generation(error.to_string())
}

const SYLLABUS_SYSTEM: &str = "You are a curriculum designer. Reply with a JSON object of the \
     form {\"chapters\": [{\"title\": \"...\", \"topics\": [\"...\"]}]}.";

const QUESTIONS_SYSTEM: &str = "You write practice questions. Reply with a JSON object of the \
     form {\"questions\": [{\"prompt\": \"...\", \"answer\": \"...\"}]}.";

const TEST_SYSTEM: &str = "You write chapter tests. Reply with a JSON object of the form \
     {\"questions\": [{\"prompt\": \"...\", \"answer\": \"...\"}]}.";

fn syllabus_prompt(subject_title: &str, guidance: Option<&str>) -> String {
    match guidance {
        Some(guidance) => format!(
            "Outline a course syllabus for \"{}\". Additional guidance: {}",
            subject_title, guidance
        ),
        None => format!("Outline a course syllabus for \"{}\".", subject_title),
    }
}

#[async_trait::async_trait]
impl ContentGenerator for LlmContentGenerator {
    async fn generate_syllabus(
        &self,
        subject_title: &str,
        guidance: Option<&str>,
    ) -> Result<SyllabusOutline, EngineError> {
        let value = self
            .client
            .complete_json(
                &self.model,
                SYLLABUS_SYSTEM,
                &syllabus_prompt(subject_title, guidance),
            )
            .await
            .map_err(generation_error)?;

        let outline: SyllabusOutline = serde_json::from_value(value)
            .map_err(|e| EngineError::Generation(format!("outline has unexpected shape: {}", e)))?;

        if outline.chapters.is_empty() {
            return Err(EngineError::Generation("outline has no chapters".into()));
        }

        Ok(outline)
    }

    async fn generate_notes(
        &self,
        subject_title: &str,
        topic_title: &str,
    ) -> Result<String, EngineError> {
        let messages = vec![
            ai_client::Message::system(
                "You are a tutor writing concise study notes in markdown.",
            ),
            ai_client::Message::user(format!(
                "Write study notes for the topic \"{}\" in the subject \"{}\".",
                topic_title, subject_title
            )),
        ];

        self.client
            .complete(&self.model, messages)
            .await
            .map_err(generation_error)
    }

    async fn generate_questions(
        &self,
        topic_title: &str,
        count: u32,
    ) -> Result<Value, EngineError> {
        self.client
            .complete_json(
                &self.model,
                QUESTIONS_SYSTEM,
                &format!(
                    "Write {} practice questions for the topic \"{}\".",
                    count, topic_title
                ),
            )
            .await
            .map_err(generation_error)
    }

    async fn generate_test(
        &self,
        chapter_title: &str,
        topic_titles: &[String],
        question_count: u32,
    ) -> Result<Value, EngineError> {
        self.client
            .complete_json(
                &self.model,
                TEST_SYSTEM,
                &format!(
                    "Write a {}-question test for the chapter \"{}\" covering: {}.",
                    question_count,
                    chapter_title,
                    topic_titles.join(", ")
                ),
            )
            .await
            .map_err(generation_error)
    }
}
