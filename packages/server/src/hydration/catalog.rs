//! Course catalog models.
//!
//! Subjects contain chapters, chapters contain topics. Generated content
//! lives in nullable JSONB/text columns on these rows; a null column means
//! that hydration stage has not completed for the row yet, which is also
//! what the assemble stage checks.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::Record;

// ============================================================================
// Subject
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Subject {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub title: String,
    #[builder(default, setter(strip_option))]
    pub description: Option<String>,
    /// Generated outline, set by the syllabus stage.
    #[builder(default, setter(strip_option))]
    pub syllabus: Option<serde_json::Value>,
    /// Final assembled course, set by the assemble stage.
    #[builder(default, setter(strip_option))]
    pub course_artifact: Option<serde_json::Value>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const SUBJECT_COLUMNS: &str =
    "id, title, description, syllabus, course_artifact, created_at, updated_at";

impl Subject {
    pub async fn set_syllabus<'e, E>(
        id: Uuid,
        syllabus: &serde_json::Value,
        executor: E,
    ) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query("UPDATE subjects SET syllabus = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(syllabus)
            .execute(executor)
            .await?;

        Ok(())
    }

    pub async fn set_course_artifact(
        id: Uuid,
        artifact: &serde_json::Value,
        db: &PgPool,
    ) -> Result<()> {
        sqlx::query("UPDATE subjects SET course_artifact = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(artifact)
            .execute(db)
            .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Record for Subject {
    const TABLE: &'static str = "subjects";
    type Id = Uuid;

    async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;

        Ok(row)
    }

    async fn insert(&self, db: &PgPool) -> Result<Self> {
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO subjects (id, title, description, syllabus, course_artifact, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SUBJECT_COLUMNS}
            "#,
        ))
        .bind(self.id)
        .bind(&self.title)
        .bind(&self.description)
        .bind(&self.syllabus)
        .bind(&self.course_artifact)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await?;

        Ok(row)
    }
}

// ============================================================================
// Chapter
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Chapter {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub subject_id: Uuid,
    pub title: String,
    pub position: i32,
    /// Generated chapter test, set by the tests stage.
    #[builder(default, setter(strip_option))]
    pub chapter_test: Option<serde_json::Value>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const CHAPTER_COLUMNS: &str =
    "id, subject_id, title, position, chapter_test, created_at, updated_at";

impl Chapter {
    pub async fn find_by_subject(subject_id: Uuid, db: &PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE subject_id = $1 ORDER BY position ASC",
        ))
        .bind(subject_id)
        .fetch_all(db)
        .await?;

        Ok(rows)
    }

    /// Drop a subject's chapters (topics cascade), for syllabus regeneration.
    pub async fn delete_by_subject<'e, E>(subject_id: Uuid, executor: E) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query("DELETE FROM chapters WHERE subject_id = $1")
            .bind(subject_id)
            .execute(executor)
            .await?;

        Ok(())
    }

    pub async fn insert_with<'e, E>(&self, executor: E) -> Result<Self>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO chapters (id, subject_id, title, position, chapter_test, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {CHAPTER_COLUMNS}
            "#,
        ))
        .bind(self.id)
        .bind(self.subject_id)
        .bind(&self.title)
        .bind(self.position)
        .bind(&self.chapter_test)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(executor)
        .await?;

        Ok(row)
    }

    pub async fn set_chapter_test(id: Uuid, test: &serde_json::Value, db: &PgPool) -> Result<()> {
        sqlx::query("UPDATE chapters SET chapter_test = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(test)
            .execute(db)
            .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Record for Chapter {
    const TABLE: &'static str = "chapters";
    type Id = Uuid;

    async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;

        Ok(row)
    }

    async fn insert(&self, db: &PgPool) -> Result<Self> {
        self.insert_with(db).await
    }
}

// ============================================================================
// Topic
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Topic {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub title: String,
    pub position: i32,
    /// Generated study notes, set by the notes stage.
    #[builder(default, setter(strip_option))]
    pub notes: Option<String>,
    /// Generated practice questions, set by the questions stage.
    #[builder(default, setter(strip_option))]
    pub questions: Option<serde_json::Value>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const TOPIC_COLUMNS: &str =
    "id, chapter_id, title, position, notes, questions, created_at, updated_at";

impl Topic {
    pub async fn find_by_chapter(chapter_id: Uuid, db: &PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE chapter_id = $1 ORDER BY position ASC",
        ))
        .bind(chapter_id)
        .fetch_all(db)
        .await?;

        Ok(rows)
    }

    pub async fn insert_with<'e, E>(&self, executor: E) -> Result<Self>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO topics (id, chapter_id, title, position, notes, questions, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TOPIC_COLUMNS}
            "#,
        ))
        .bind(self.id)
        .bind(self.chapter_id)
        .bind(&self.title)
        .bind(self.position)
        .bind(&self.notes)
        .bind(&self.questions)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(executor)
        .await?;

        Ok(row)
    }

    pub async fn set_notes(id: Uuid, notes: &str, db: &PgPool) -> Result<()> {
        sqlx::query("UPDATE topics SET notes = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(notes)
            .execute(db)
            .await?;

        Ok(())
    }

    pub async fn set_questions(id: Uuid, questions: &serde_json::Value, db: &PgPool) -> Result<()> {
        sqlx::query("UPDATE topics SET questions = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(questions)
            .execute(db)
            .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Record for Topic {
    const TABLE: &'static str = "topics";
    type Id = Uuid;

    async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;

        Ok(row)
    }

    async fn insert(&self, db: &PgPool) -> Result<Self> {
        self.insert_with(db).await
    }
}
