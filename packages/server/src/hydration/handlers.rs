//! Per-stage hydration handlers.
//!
//! Registered once at worker startup. Each handler fetches its target,
//! calls the generator, persists the result, and returns a JSON summary
//! that lands in the job's COMPLETED log row. Handlers are written to be
//! re-runnable: at-least-once delivery means the same job can execute
//! twice, and a second run must converge on the same state.

use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::common::Record;
use crate::kernel::deps::EngineDeps;
use crate::kernel::error::EngineError;
use crate::kernel::jobs::{HydrationRegistry, JobPayload, JobType};

use super::catalog::{Chapter, Subject, Topic};

/// Wire every hydration stage into the registry.
pub fn register_hydration_handlers(registry: &mut HydrationRegistry, deps: Arc<EngineDeps>) {
    {
        let deps = Arc::clone(&deps);
        registry.register(JobType::Syllabus, move |_job, payload| {
            let deps = Arc::clone(&deps);
            async move {
                match payload {
                    JobPayload::Syllabus {
                        subject_id,
                        guidance,
                    } => run_syllabus(&deps, subject_id, guidance.as_deref()).await,
                    other => Err(unexpected_payload(other)),
                }
            }
        });
    }

    {
        let deps = Arc::clone(&deps);
        registry.register(JobType::Notes, move |_job, payload| {
            let deps = Arc::clone(&deps);
            async move {
                match payload {
                    JobPayload::Notes {
                        topic_id,
                        regenerate,
                    } => run_notes(&deps, topic_id, regenerate).await,
                    other => Err(unexpected_payload(other)),
                }
            }
        });
    }

    {
        let deps = Arc::clone(&deps);
        registry.register(JobType::Questions, move |_job, payload| {
            let deps = Arc::clone(&deps);
            async move {
                match payload {
                    JobPayload::Questions { topic_id, count } => {
                        run_questions(&deps, topic_id, count).await
                    }
                    other => Err(unexpected_payload(other)),
                }
            }
        });
    }

    {
        let deps = Arc::clone(&deps);
        registry.register(JobType::Tests, move |_job, payload| {
            let deps = Arc::clone(&deps);
            async move {
                match payload {
                    JobPayload::Tests {
                        chapter_id,
                        question_count,
                    } => run_tests(&deps, chapter_id, question_count).await,
                    other => Err(unexpected_payload(other)),
                }
            }
        });
    }

    {
        let deps = Arc::clone(&deps);
        registry.register(JobType::Assemble, move |_job, payload| {
            let deps = Arc::clone(&deps);
            async move {
                match payload {
                    JobPayload::Assemble { subject_id } => run_assemble(&deps, subject_id).await,
                    other => Err(unexpected_payload(other)),
                }
            }
        });
    }
}

fn unexpected_payload(payload: JobPayload) -> EngineError {
    // The registry validates kind against job_type before dispatch; this
    // arm only fires if a handler is registered under the wrong type.
    EngineError::Payload(format!("handler received {:?}", payload.job_type()))
}

async fn run_syllabus(
    deps: &EngineDeps,
    subject_id: Uuid,
    guidance: Option<&str>,
) -> Result<Value, EngineError> {
    let subject = Subject::find_by_id(subject_id, &deps.db_pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("subject {}", subject_id)))?;

    let outline = deps
        .generator
        .generate_syllabus(&subject.title, guidance)
        .await?;

    let outline_value = serde_json::to_value(&outline)
        .context("serializing syllabus outline")
        .map_err(EngineError::Other)?;

    // Regeneration replaces the whole structure; topics cascade with their
    // chapters.
    let mut tx = deps.db_pool.begin().await.map_err(EngineError::Storage)?;

    Chapter::delete_by_subject(subject_id, &mut *tx).await?;

    let mut topic_count = 0usize;
    for (chapter_position, chapter_outline) in outline.chapters.iter().enumerate() {
        let chapter = Chapter::builder()
            .subject_id(subject_id)
            .title(chapter_outline.title.clone())
            .position(chapter_position as i32)
            .build()
            .insert_with(&mut *tx)
            .await?;

        for (topic_position, topic_title) in chapter_outline.topics.iter().enumerate() {
            Topic::builder()
                .chapter_id(chapter.id)
                .title(topic_title.clone())
                .position(topic_position as i32)
                .build()
                .insert_with(&mut *tx)
                .await?;
            topic_count += 1;
        }
    }

    Subject::set_syllabus(subject_id, &outline_value, &mut *tx).await?;

    tx.commit().await.map_err(EngineError::Storage)?;

    info!(%subject_id, chapters = outline.chapters.len(), topics = topic_count, "syllabus hydrated");
    Ok(json!({ "chapters": outline.chapters.len(), "topics": topic_count }))
}

async fn run_notes(
    deps: &EngineDeps,
    topic_id: Uuid,
    regenerate: bool,
) -> Result<Value, EngineError> {
    let topic = Topic::find_by_id(topic_id, &deps.db_pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("topic {}", topic_id)))?;

    if topic.notes.is_some() && !regenerate {
        return Ok(json!({ "skipped": "notes_present" }));
    }

    let chapter = Chapter::find_by_id(topic.chapter_id, &deps.db_pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("chapter {}", topic.chapter_id)))?;
    let subject = Subject::find_by_id(chapter.subject_id, &deps.db_pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("subject {}", chapter.subject_id)))?;

    let notes = deps
        .generator
        .generate_notes(&subject.title, &topic.title)
        .await?;

    Topic::set_notes(topic_id, &notes, &deps.db_pool).await?;

    info!(%topic_id, chars = notes.len(), "notes hydrated");
    Ok(json!({ "chars": notes.len() }))
}

async fn run_questions(deps: &EngineDeps, topic_id: Uuid, count: u32) -> Result<Value, EngineError> {
    let topic = Topic::find_by_id(topic_id, &deps.db_pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("topic {}", topic_id)))?;

    let questions = deps.generator.generate_questions(&topic.title, count).await?;

    Topic::set_questions(topic_id, &questions, &deps.db_pool).await?;

    info!(%topic_id, count, "questions hydrated");
    Ok(json!({ "requested": count }))
}

async fn run_tests(
    deps: &EngineDeps,
    chapter_id: Uuid,
    question_count: u32,
) -> Result<Value, EngineError> {
    let chapter = Chapter::find_by_id(chapter_id, &deps.db_pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("chapter {}", chapter_id)))?;

    let topics = Topic::find_by_chapter(chapter_id, &deps.db_pool).await?;
    let titles: Vec<String> = topics.into_iter().map(|topic| topic.title).collect();

    let test = deps
        .generator
        .generate_test(&chapter.title, &titles, question_count)
        .await?;

    Chapter::set_chapter_test(chapter_id, &test, &deps.db_pool).await?;

    info!(%chapter_id, topics = titles.len(), "chapter test hydrated");
    Ok(json!({ "topics": titles.len(), "questions": question_count }))
}

async fn run_assemble(deps: &EngineDeps, subject_id: Uuid) -> Result<Value, EngineError> {
    let subject = Subject::find_by_id(subject_id, &deps.db_pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("subject {}", subject_id)))?;

    let chapters = Chapter::find_by_subject(subject_id, &deps.db_pool).await?;
    if chapters.is_empty() {
        return Err(EngineError::Generation(format!(
            "subject {} has no chapters to assemble",
            subject_id
        )));
    }

    let mut missing = Vec::new();
    let mut assembled_chapters = Vec::new();
    let mut topic_count = 0usize;

    for chapter in &chapters {
        if chapter.chapter_test.is_none() {
            missing.push(format!("test for chapter '{}'", chapter.title));
        }

        let topics = Topic::find_by_chapter(chapter.id, &deps.db_pool).await?;
        let mut assembled_topics = Vec::new();

        for topic in topics {
            if topic.notes.is_none() {
                missing.push(format!("notes for topic '{}'", topic.title));
            }
            if topic.questions.is_none() {
                missing.push(format!("questions for topic '{}'", topic.title));
            }

            assembled_topics.push(json!({
                "id": topic.id,
                "title": topic.title,
                "notes": topic.notes,
                "questions": topic.questions,
            }));
            topic_count += 1;
        }

        assembled_chapters.push(json!({
            "id": chapter.id,
            "title": chapter.title,
            "test": chapter.chapter_test,
            "topics": assembled_topics,
        }));
    }

    // Prerequisite content may still be generating; retryable, not terminal.
    if !missing.is_empty() {
        return Err(EngineError::Generation(format!(
            "incomplete content: {}",
            missing.join("; ")
        )));
    }

    let artifact = json!({
        "subject": { "id": subject.id, "title": subject.title },
        "chapters": assembled_chapters,
    });

    Subject::set_course_artifact(subject_id, &artifact, &deps.db_pool).await?;

    info!(%subject_id, chapters = chapters.len(), topics = topic_count, "course assembled");
    Ok(json!({ "chapters": chapters.len(), "topics": topic_count }))
}
