use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowFlavor {
    /// research → debate → synthesis
    #[default]
    Swarm,
    /// queued → running → complete, with a percent gauge
    Builder,
}

impl WorkflowFlavor {
    pub fn initial_phase(self) -> WorkflowPhase {
        match self {
            WorkflowFlavor::Swarm => WorkflowPhase::Research,
            WorkflowFlavor::Builder => WorkflowPhase::Queued,
        }
    }

    pub fn terminal_phase(self) -> WorkflowPhase {
        match self {
            WorkflowFlavor::Swarm => WorkflowPhase::Synthesis,
            WorkflowFlavor::Builder => WorkflowPhase::Complete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Research,
    Debate,
    Synthesis,
    Queued,
    Running,
    Complete,
}

impl WorkflowPhase {
    pub fn flavor(self) -> WorkflowFlavor {
        match self {
            WorkflowPhase::Research | WorkflowPhase::Debate | WorkflowPhase::Synthesis => {
                WorkflowFlavor::Swarm
            }
            WorkflowPhase::Queued | WorkflowPhase::Running | WorkflowPhase::Complete => {
                WorkflowFlavor::Builder
            }
        }
    }

    fn rank(self) -> u8 {
        match self {
            WorkflowPhase::Research | WorkflowPhase::Queued => 0,
            WorkflowPhase::Debate | WorkflowPhase::Running => 1,
            WorkflowPhase::Synthesis | WorkflowPhase::Complete => 2,
        }
    }
}

/// A multi-phase background process tied to the entity that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRecord {
    pub entity_id: i64,
    pub flavor: WorkflowFlavor,
    pub phase: WorkflowPhase,
    pub actors: Vec<String>,
    /// Builder gauge, 0..=100.
    pub progress: u8,
    pub completed: bool,
    pub summary: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    fn new(entity_id: i64, flavor: WorkflowFlavor, now: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            flavor,
            phase: flavor.initial_phase(),
            actors: Vec::new(),
            progress: 0,
            completed: false,
            summary: None,
            started_at: now,
            updated_at: now,
        }
    }

    fn join(&mut self, actors: &[String]) -> bool {
        let mut changed = false;
        for actor in actors {
            if !self.actors.contains(actor) {
                self.actors.push(actor.clone());
                changed = true;
            }
        }
        changed
    }
}

/// Sub-workflow records keyed by triggering entity id. Records are never dropped implicitly.
#[derive(Debug, Default)]
pub struct WorkflowBoard {
    records: HashMap<i64, WorkflowRecord>,
}

impl WorkflowBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(
        &mut self,
        entity_id: i64,
        flavor: WorkflowFlavor,
        now: DateTime<Utc>,
    ) -> &mut WorkflowRecord {
        self.records
            .entry(entity_id)
            .or_insert_with(|| WorkflowRecord::new(entity_id, flavor, now))
    }

    pub fn start(
        &mut self,
        entity_id: i64,
        flavor: WorkflowFlavor,
        actors: &[String],
        now: DateTime<Utc>,
    ) -> bool {
        let created = !self.records.contains_key(&entity_id);
        let record = self.record(entity_id, flavor, now);
        if record.completed {
            return false;
        }
        let joined = record.join(actors);
        if joined {
            record.updated_at = now;
        }
        created || joined
    }

    /// Moves the record forward to `phase`. Phases of another flavor and backward moves are ignored.
    pub fn advance(&mut self, entity_id: i64, phase: WorkflowPhase, now: DateTime<Utc>) -> bool {
        let created = !self.records.contains_key(&entity_id);
        let record = self.record(entity_id, phase.flavor(), now);
        if record.completed || record.flavor != phase.flavor() {
            return created;
        }
        if phase.rank() <= record.phase.rank() {
            return created;
        }
        record.phase = phase;
        record.updated_at = now;
        true
    }

    /// Raises the builder gauge; the gauge never moves backwards.
    pub fn progress(&mut self, entity_id: i64, percent: f64, now: DateTime<Utc>) -> bool {
        let created = !self.records.contains_key(&entity_id);
        let record = self.record(entity_id, WorkflowFlavor::Builder, now);
        if record.completed || record.flavor != WorkflowFlavor::Builder {
            return created;
        }
        let percent = if percent.is_nan() {
            0
        } else {
            percent.clamp(0.0, 100.0).round() as u8
        };
        let mut changed = created;
        if percent > record.progress {
            record.progress = percent;
            changed = true;
        }
        if record.phase == WorkflowPhase::Queued && percent > 0 {
            record.phase = WorkflowPhase::Running;
            changed = true;
        }
        if changed {
            record.updated_at = now;
        }
        changed
    }

    pub fn complete(
        &mut self,
        entity_id: i64,
        flavor: Option<WorkflowFlavor>,
        summary: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let record = self.record(entity_id, flavor.unwrap_or_default(), now);
        if record.completed {
            return false;
        }
        record.completed = true;
        record.phase = record.flavor.terminal_phase();
        if record.flavor == WorkflowFlavor::Builder {
            record.progress = 100;
        }
        record.summary = summary;
        record.updated_at = now;
        true
    }

    pub fn get(&self, entity_id: i64) -> Option<&WorkflowRecord> {
        self.records.get(&entity_id)
    }

    /// All records ordered by entity id.
    pub fn records(&self) -> Vec<WorkflowRecord> {
        let mut records: Vec<WorkflowRecord> = self.records.values().cloned().collect();
        records.sort_by_key(|record| record.entity_id);
        records
    }

    pub fn active(&self) -> usize {
        self.records.values().filter(|r| !r.completed).count()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
