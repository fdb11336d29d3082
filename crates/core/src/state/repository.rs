//! # Project Repository
//!
//! Reads and writes the nested project shape against the relational schema.
//! A save is one transaction: project upsert, one upsert per stage present in
//! the payload, and a new `stage_versions` row whenever a completed stage's
//! output changed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::db::DiscoveryDb;
use super::project::{ProjectState, StageData, StageStatus, StageVersion};
use super::store::ProjectBackend;
use crate::error::DiscoveryError;
use crate::stages::DiscoveryStage;

/// The single implicit project
pub const DEFAULT_PROJECT_ID: &str = "default-project";

const UNNAMED_PROJECT: &str = "Unnamed Project";

/// A loaded project and the revision it was saved at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedProject {
    #[serde(flatten)]
    pub state: ProjectState,
    #[serde(default)]
    pub revision: i64,
}

/// Outcome of a successful save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub revision: i64,
    #[serde(default)]
    pub versions_added: usize,
}

/// Project persistence over the shared connection
pub struct ProjectRepository {
    conn: Arc<Mutex<Connection>>,
    project_id: String,
}

/// Stage row as stored, JSON columns still encoded
struct StageRow {
    stage_name: String,
    input: String,
    output: String,
    status: String,
    questions: String,
    answers: String,
    grounding_sources: Option<String>,
    search_entry_point_html: Option<String>,
    coherence_score: u8,
    urls: String,
    files: String,
    format_reference: Option<String>,
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ProjectRepository {
    pub fn new(db: &DiscoveryDb) -> Self {
        Self {
            conn: db.connection(),
            project_id: DEFAULT_PROJECT_ID.to_string(),
        }
    }

    /// Load the project with every stage and its full version history
    pub fn load(&self) -> Result<Option<LoadedProject>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let project = conn
            .query_row(
                "SELECT metadata, current_stage, revision FROM projects WHERE id = ?1",
                params![self.project_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((metadata, current_stage, revision)) = project else {
            return Ok(None);
        };

        let mut state = ProjectState {
            current_stage: current_stage.parse().unwrap_or_default(),
            project_metadata: serde_json::from_str(&metadata)
                .context("Corrupt project metadata")?,
            stages: BTreeMap::new(),
        };

        for row in Self::stage_rows(&conn, &self.project_id)? {
            let stage: DiscoveryStage = match row.stage_name.parse() {
                Ok(stage) => stage,
                Err(_) => {
                    tracing::warn!(stage = %row.stage_name, "Skipping unknown stage row");
                    continue;
                }
            };
            let mut data = Self::decode_stage(row)?;
            data.versions = Self::versions_for(&conn, &self.project_id, stage)?;
            state.stages.insert(stage, data);
        }

        Ok(Some(LoadedProject { state, revision }))
    }

    fn stage_rows(conn: &Connection, project_id: &str) -> Result<Vec<StageRow>> {
        let mut stmt = conn.prepare(
            "SELECT stage_name, input, output, status, questions, answers, grounding_sources,
                    search_entry_point_html, coherence_score, urls, files, format_reference
             FROM stages WHERE project_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok(StageRow {
                    stage_name: row.get(0)?,
                    input: row.get(1)?,
                    output: row.get(2)?,
                    status: row.get(3)?,
                    questions: row.get(4)?,
                    answers: row.get(5)?,
                    grounding_sources: row.get(6)?,
                    search_entry_point_html: row.get(7)?,
                    coherence_score: row.get(8)?,
                    urls: row.get(9)?,
                    files: row.get(10)?,
                    format_reference: row.get(11)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn decode_stage(row: StageRow) -> Result<StageData> {
        let context = || format!("Corrupt stage row {}", row.stage_name);
        Ok(StageData {
            input: row.input.clone(),
            output: row.output.clone(),
            status: StageStatus::from_str(&row.status),
            questions: serde_json::from_str(&row.questions).with_context(context)?,
            answers: serde_json::from_str(&row.answers).with_context(context)?,
            grounding_sources: row
                .grounding_sources
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .with_context(context)?,
            search_entry_point_html: row.search_entry_point_html.clone(),
            coherence_score: row.coherence_score,
            urls: serde_json::from_str(&row.urls).with_context(context)?,
            files: serde_json::from_str(&row.files).with_context(context)?,
            format_reference: row
                .format_reference
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .with_context(context)?,
            versions: Vec::new(),
        })
    }

    fn versions_for(
        conn: &Connection,
        project_id: &str,
        stage: DiscoveryStage,
    ) -> Result<Vec<StageVersion>> {
        let mut stmt = conn.prepare(
            "SELECT id, output, input, questions, coherence_score, created_at
             FROM stage_versions
             WHERE project_id = ?1 AND stage_name = ?2
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let raw = stmt
            .query_map(params![project_id, stage.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u8>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(id, output, input, questions, coherence_score, created_at)| {
                let timestamp = DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.timestamp_millis())
                    .unwrap_or_default();
                Ok(StageVersion {
                    id,
                    timestamp,
                    output,
                    input,
                    questions: serde_json::from_str(&questions)
                        .context("Corrupt version questions")?,
                    coherence_score,
                    search_entry_point_html: None,
                })
            })
            .collect()
    }

    /// Persist the full state in one transaction.
    ///
    /// When `expected_revision` is given and differs from the stored revision
    /// the save is rejected with [`DiscoveryError::RevisionConflict`] and
    /// nothing is written.
    pub fn save(&self, state: &ProjectState, expected_revision: Option<i64>) -> Result<SaveReceipt> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute("BEGIN TRANSACTION", [])?;

        let result = (|| -> Result<SaveReceipt> {
            let actual: i64 = conn
                .query_row(
                    "SELECT revision FROM projects WHERE id = ?1",
                    params![self.project_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);

            if let Some(expected) = expected_revision {
                if expected != actual {
                    return Err(DiscoveryError::RevisionConflict { expected, actual }.into());
                }
            }

            let revision = actual + 1;
            let now = now_timestamp();
            let name = if state.project_metadata.company_name.is_empty() {
                UNNAMED_PROJECT
            } else {
                state.project_metadata.company_name.as_str()
            };

            conn.execute(
                "INSERT INTO projects (id, name, metadata, current_stage, revision, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    metadata = excluded.metadata,
                    current_stage = excluded.current_stage,
                    revision = excluded.revision,
                    updated_at = excluded.updated_at",
                params![
                    self.project_id,
                    name,
                    serde_json::to_string(&state.project_metadata)?,
                    state.current_stage.as_str(),
                    revision,
                    now,
                ],
            )?;

            let mut versions_added = 0;
            for (stage, data) in &state.stages {
                if Self::upsert_stage(&conn, &self.project_id, *stage, data, &now)? {
                    versions_added += 1;
                }
            }

            Ok(SaveReceipt {
                revision,
                versions_added,
            })
        })();

        match result {
            Ok(receipt) => {
                conn.execute("COMMIT", [])?;
                tracing::info!(
                    revision = receipt.revision,
                    versions_added = receipt.versions_added,
                    "Project saved"
                );
                Ok(receipt)
            }
            Err(e) => {
                conn.execute("ROLLBACK", []).ok();
                Err(e)
            }
        }
    }

    /// Upsert one stage row. Returns true when a version row was appended.
    fn upsert_stage(
        conn: &Connection,
        project_id: &str,
        stage: DiscoveryStage,
        data: &StageData,
        now: &str,
    ) -> Result<bool> {
        let previous_output: Option<String> = conn
            .query_row(
                "SELECT output FROM stages WHERE project_id = ?1 AND stage_name = ?2",
                params![project_id, stage.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let questions = serde_json::to_string(&data.questions)?;

        conn.execute(
            "INSERT INTO stages (project_id, stage_name, input, output, status, questions, answers,
                                 grounding_sources, search_entry_point_html, coherence_score,
                                 urls, files, format_reference, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(project_id, stage_name) DO UPDATE SET
                input = excluded.input,
                output = excluded.output,
                status = excluded.status,
                questions = excluded.questions,
                answers = excluded.answers,
                grounding_sources = excluded.grounding_sources,
                search_entry_point_html = excluded.search_entry_point_html,
                coherence_score = excluded.coherence_score,
                urls = excluded.urls,
                files = excluded.files,
                format_reference = excluded.format_reference,
                updated_at = excluded.updated_at",
            params![
                project_id,
                stage.as_str(),
                data.input,
                data.output,
                data.status.as_str(),
                questions,
                serde_json::to_string(&data.answers)?,
                data.grounding_sources
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                data.search_entry_point_html,
                data.coherence_score,
                serde_json::to_string(&data.urls)?,
                serde_json::to_string(&data.files)?,
                data.format_reference
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                now,
            ],
        )?;

        let changed = previous_output.as_deref() != Some(data.output.as_str());
        if data.status == StageStatus::Completed && changed {
            conn.execute(
                "INSERT INTO stage_versions (id, project_id, stage_name, output, input, questions,
                                             coherence_score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    project_id,
                    stage.as_str(),
                    data.output,
                    data.input,
                    questions,
                    data.coherence_score,
                    now,
                ],
            )?;
            tracing::debug!(stage = %stage, "Appended stage version");
            return Ok(true);
        }

        Ok(false)
    }

    /// Number of stored versions for a stage
    pub fn version_count(&self, stage: DiscoveryStage) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stage_versions WHERE project_id = ?1 AND stage_name = ?2",
            params![self.project_id, stage.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl ProjectBackend for ProjectRepository {
    async fn load(&self) -> Result<Option<LoadedProject>> {
        ProjectRepository::load(self)
    }

    async fn save(&self, state: &ProjectState, expected_revision: Option<i64>) -> Result<SaveReceipt> {
        ProjectRepository::save(self, state, expected_revision)
    }
}
