use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Marks run-aborting errors in [`SyncReport::errors`].
pub const FATAL_ERROR_PREFIX: &str = "fatal: ";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseResult {
    pub phase: String,
    pub endpoint: String,
    pub entity: String,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl PhaseResult {
    pub fn new(phase: impl Into<String>, endpoint: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            endpoint: endpoint.into(),
            entity: entity.into(),
            created: 0,
            updated: 0,
            skipped: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// A record that failed to write: logged and counted as skipped.
    pub fn record_error(&mut self, message: String) {
        self.errors.push(message);
        self.skipped += 1;
    }

    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} skipped, {} errors",
            self.created,
            self.updated,
            self.skipped,
            self.errors.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub phases: Vec<PhaseResult>,
    pub knowledge_base_document_count: usize,
    pub duration_ms: u64,
    /// Every phase error, followed by at most one fatal error.
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            dry_run,
            phases: Vec::new(),
            knowledge_base_document_count: 0,
            duration_ms: 0,
            errors: Vec::new(),
        }
    }

    pub fn push_phase(&mut self, phase: PhaseResult) {
        self.errors.extend(phase.errors.iter().cloned());
        self.phases.push(phase);
    }

    pub fn push_fatal(&mut self, message: impl std::fmt::Display) {
        self.errors.push(format!("{FATAL_ERROR_PREFIX}{message}"));
    }

    pub fn fatal_errors(&self) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|e| e.starts_with(FATAL_ERROR_PREFIX))
            .map(String::as_str)
            .collect()
    }

    /// `false` when the run aborted before its last phase.
    pub fn is_complete(&self) -> bool {
        self.fatal_errors().is_empty()
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == name)
    }

    pub fn totals(&self) -> (u64, u64, u64) {
        self.phases.iter().fold((0, 0, 0), |(c, u, s), p| {
            (c + p.created, u + p.updated, s + p.skipped)
        })
    }
}
