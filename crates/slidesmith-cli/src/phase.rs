//! Workflow phases and the transitions allowed between them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

/// Where an interactive session keeps its phase between runs
pub const PHASE_FILE: &str = ".slidesmith/phase.json";

/// Stage of a presentation task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Collecting,
    Architect,
    EditingPlan,
    Designing,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Collecting => "collecting",
            Phase::Architect => "architect",
            Phase::EditingPlan => "editing_plan",
            Phase::Designing => "designing",
            Phase::Completed => "completed",
        }
    }

    /// Phases reachable from this one
    pub fn transitions(&self) -> &'static [Phase] {
        match self {
            Phase::Collecting => &[Phase::Architect, Phase::EditingPlan],
            Phase::Architect => &[Phase::EditingPlan, Phase::Collecting],
            Phase::EditingPlan => &[Phase::Designing, Phase::Architect, Phase::Collecting],
            Phase::Designing => &[Phase::Completed, Phase::EditingPlan],
            Phase::Completed => &[Phase::EditingPlan, Phase::Collecting],
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase names accepted by the `phase_complete` tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalledPhase {
    Collecting,
    Architect,
    Designer,
}

impl SignalledPhase {
    pub const NAMES: [&'static str; 3] = ["collecting", "architect", "designer"];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "collecting" => Some(Self::Collecting),
            "architect" => Some(Self::Architect),
            "designer" => Some(Self::Designer),
            _ => None,
        }
    }

    /// Where the workflow goes once this phase reports done
    pub fn next_phase(&self) -> Phase {
        match self {
            Self::Collecting => Phase::Architect,
            Self::Architect => Phase::EditingPlan,
            Self::Designer => Phase::Completed,
        }
    }
}

/// A completed-phase notification sent by the `phase_complete` tool
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSignal {
    pub phase: SignalledPhase,
    pub summary: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PhaseError {
    #[error("Cannot transition from '{from}' to '{to}'")]
    InvalidTransition { from: Phase, to: Phase },
}

/// A phase that has been left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
}

impl PhaseRecord {
    pub fn duration(&self) -> chrono::Duration {
        self.exited_at - self.entered_at
    }
}

/// Tracks the current phase, its metadata and where the task has been
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseManager {
    current: Phase,
    entered_at: DateTime<Utc>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    history: Vec<PhaseRecord>,
}

impl PhaseManager {
    pub fn new(initial: Phase) -> Self {
        Self {
            current: initial,
            entered_at: Utc::now(),
            metadata: Map::new(),
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn entered_at(&self) -> DateTime<Utc> {
        self.entered_at
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn history(&self) -> &[PhaseRecord] {
        &self.history
    }

    pub fn can_transition_to(&self, target: Phase) -> bool {
        self.current.transitions().contains(&target)
    }

    pub fn valid_transitions(&self) -> &'static [Phase] {
        self.current.transitions()
    }

    /// Move to `target` if the transition table allows it
    pub fn transition_to(
        &mut self,
        target: Phase,
        metadata: Map<String, Value>,
    ) -> Result<(), PhaseError> {
        if !self.can_transition_to(target) {
            return Err(PhaseError::InvalidTransition {
                from: self.current,
                to: target,
            });
        }
        self.enter(target, metadata);
        Ok(())
    }

    /// Move to `target` regardless of the transition table
    pub fn force_transition(&mut self, target: Phase, metadata: Map<String, Value>) {
        self.enter(target, metadata);
    }

    fn enter(&mut self, target: Phase, metadata: Map<String, Value>) {
        let now = Utc::now();
        self.history.push(PhaseRecord {
            phase: self.current,
            entered_at: self.entered_at,
            exited_at: now,
        });
        tracing::info!(from = %self.current, to = %target, "phase transition");
        self.current = target;
        self.entered_at = now;
        self.metadata = metadata;
    }

    /// Apply a `phase_complete` notification, recording its summary.
    /// Returns the new phase, or `None` when the table forbids the move.
    pub fn apply_signal(&mut self, signal: &PhaseSignal) -> Option<Phase> {
        let target = signal.phase.next_phase();
        let mut metadata = Map::new();
        metadata.insert("summary".into(), Value::String(signal.summary.clone()));
        match self.transition_to(target, metadata) {
            Ok(()) => Some(target),
            Err(e) => {
                tracing::warn!("ignoring phase signal: {}", e);
                None
            }
        }
    }

    pub fn time_in_phase(&self) -> chrono::Duration {
        Utc::now() - self.entered_at
    }

    pub fn reset(&mut self, initial: Phase) {
        *self = Self::new(initial);
    }

    /// Saved state of a workspace, if any
    pub fn load(workspace_root: &Path) -> Option<Self> {
        let path = workspace_root.join(PHASE_FILE);
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(manager) => Some(manager),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring unreadable phase state: {}", e);
                None
            }
        }
    }

    pub fn save(&self, workspace_root: &Path) -> std::io::Result<()> {
        let path = workspace_root.join(PHASE_FILE);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl Default for PhaseManager {
    fn default() -> Self {
        Self::new(Phase::Collecting)
    }
}
