// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Analytics entities: per-instance lines and areas.
//!
//! Each instance owns keyed collections of geometric entities that
//! parameterise its analytics nodes. Mutations try an in-place runtime
//! update first; when the graph cannot take the change, the set goes Dirty
//! and a restart is scheduled (running instances) or the change waits for
//! the next start (stopped instances). Deleting an instance removes its set
//! atomically.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// One point of a polyline/polygon, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Crossing direction filter for line entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Direction {
    Up,
    Down,
    #[default]
    Both,
}

/// Line flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Counting,
    Crossing,
    Tailgating,
}

impl LineKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "counting" => Some(Self::Counting),
            "crossing" => Some(Self::Crossing),
            "tailgating" => Some(Self::Tailgating),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counting => "counting",
            Self::Crossing => "crossing",
            Self::Tailgating => "tailgating",
        }
    }
}

/// Area flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaKind {
    Exclusion,
    Masking,
    Motion,
}

impl AreaKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exclusion" => Some(Self::Exclusion),
            "masking" => Some(Self::Masking),
            "motion" => Some(Self::Motion),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exclusion => "exclusion",
            Self::Masking => "masking",
            Self::Motion => "motion",
        }
    }
}

/// A polyline entity owned by exactly one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    #[serde(rename = "lineId")]
    pub line_id: String,
    pub kind: LineKind,
    pub coordinates: Vec<Point>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<[u8; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A polygonal entity owned by exactly one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    #[serde(rename = "areaId")]
    pub area_id: String,
    pub kind: AreaKind,
    pub coordinates: Vec<Point>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<[u8; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Sync state of an instance's entity set relative to its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntitySetState {
    /// Graph matches the entity configuration.
    #[default]
    Clean,
    /// One or more mutations pending.
    Dirty,
    /// The engine is being restarted to pick the mutations up.
    Rebuilding,
}

/// All entities of one instance.
#[derive(Debug, Clone, Default)]
pub struct EntitySet {
    pub lines: HashMap<String, Line>,
    pub areas: HashMap<String, Area>,
    pub state: EntitySetState,
}

impl EntitySet {
    /// Lines grouped by kind label, for the `lines` listing payload.
    pub fn lines_by_kind(&self) -> BTreeMap<String, Vec<Line>> {
        let mut grouped: BTreeMap<String, Vec<Line>> = BTreeMap::new();
        for line in self.lines.values() {
            grouped.entry(line.kind.as_str().to_string()).or_default().push(line.clone());
        }
        for lines in grouped.values_mut() {
            lines.sort_by(|a, b| a.line_id.cmp(&b.line_id));
        }
        grouped
    }

    pub fn areas_by_kind(&self) -> BTreeMap<String, Vec<Area>> {
        let mut grouped: BTreeMap<String, Vec<Area>> = BTreeMap::new();
        for area in self.areas.values() {
            grouped.entry(area.kind.as_str().to_string()).or_default().push(area.clone());
        }
        for areas in grouped.values_mut() {
            areas.sort_by(|a, b| a.area_id.cmp(&b.area_id));
        }
        grouped
    }

    /// Encodes the set as node parameters understood by the analytics nodes.
    pub fn to_node_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        let lines: Vec<&Line> = {
            let mut v: Vec<&Line> = self.lines.values().collect();
            v.sort_by(|a, b| a.line_id.cmp(&b.line_id));
            v
        };
        let areas: Vec<&Area> = {
            let mut v: Vec<&Area> = self.areas.values().collect();
            v.sort_by(|a, b| a.area_id.cmp(&b.area_id));
            v
        };
        params.insert(
            "lines".to_string(),
            serde_json::to_string(&lines).unwrap_or_else(|_| "[]".to_string()),
        );
        params.insert(
            "areas".to_string(),
            serde_json::to_string(&areas).unwrap_or_else(|_| "[]".to_string()),
        );
        params
    }
}

/// Per-instance keyed entity storage.
#[derive(Default)]
pub struct EntityStore {
    sets: RwLock<HashMap<String, EntitySet>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a line, returning the set's node parameters.
    pub fn upsert_line(&self, instance_id: &str, line: Line) -> BTreeMap<String, String> {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        let set = sets.entry(instance_id.to_string()).or_default();
        set.lines.insert(line.line_id.clone(), line);
        set.state = EntitySetState::Dirty;
        set.to_node_params()
    }

    pub fn upsert_area(&self, instance_id: &str, area: Area) -> BTreeMap<String, String> {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        let set = sets.entry(instance_id.to_string()).or_default();
        set.areas.insert(area.area_id.clone(), area);
        set.state = EntitySetState::Dirty;
        set.to_node_params()
    }

    /// Removes one line. False when instance or line is unknown.
    pub fn delete_line(&self, instance_id: &str, line_id: &str) -> bool {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        let Some(set) = sets.get_mut(instance_id) else { return false };
        let removed = set.lines.remove(line_id).is_some();
        if removed {
            set.state = EntitySetState::Dirty;
        }
        removed
    }

    pub fn delete_area(&self, instance_id: &str, area_id: &str) -> bool {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        let Some(set) = sets.get_mut(instance_id) else { return false };
        let removed = set.areas.remove(area_id).is_some();
        if removed {
            set.state = EntitySetState::Dirty;
        }
        removed
    }

    /// Removes every line of one kind, returning how many went away.
    pub fn delete_lines_of_kind(&self, instance_id: &str, kind: LineKind) -> usize {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        let Some(set) = sets.get_mut(instance_id) else { return 0 };
        let before = set.lines.len();
        set.lines.retain(|_, line| line.kind != kind);
        let removed = before - set.lines.len();
        if removed > 0 {
            set.state = EntitySetState::Dirty;
        }
        removed
    }

    pub fn get(&self, instance_id: &str) -> Option<EntitySet> {
        self.sets.read().unwrap_or_else(PoisonError::into_inner).get(instance_id).cloned()
    }

    pub fn get_line(&self, instance_id: &str, line_id: &str) -> Option<Line> {
        self.sets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance_id)
            .and_then(|s| s.lines.get(line_id).cloned())
    }

    pub fn set_state(&self, instance_id: &str, state: EntitySetState) {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(set) = sets.get_mut(instance_id) {
            set.state = state;
        }
    }

    pub fn state(&self, instance_id: &str) -> EntitySetState {
        self.sets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance_id)
            .map_or(EntitySetState::Clean, |s| s.state)
    }

    /// Atomic cascade used on instance deletion.
    pub fn remove_instance(&self, instance_id: &str) {
        self.sets.write().unwrap_or_else(PoisonError::into_inner).remove(instance_id);
    }

    /// Node parameters for the current set, when one exists.
    pub fn node_params(&self, instance_id: &str) -> Option<BTreeMap<String, String>> {
        self.sets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance_id)
            .map(EntitySet::to_node_params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, kind: LineKind) -> Line {
        Line {
            line_id: id.to_string(),
            kind,
            coordinates: vec![Point { x: 0.0, y: 0.0 }, Point { x: 100.0, y: 100.0 }],
            direction: Direction::Both,
            classes: vec!["Vehicle".to_string()],
            color: None,
            name: None,
        }
    }

    #[test]
    fn test_upsert_marks_dirty_and_groups_by_kind() {
        let store = EntityStore::new();
        store.upsert_line("i1", line("l1", LineKind::Crossing));
        store.upsert_line("i1", line("l2", LineKind::Counting));

        assert_eq!(store.state("i1"), EntitySetState::Dirty);
        let set = store.get("i1").expect("set");
        let grouped = set.lines_by_kind();
        assert_eq!(grouped.get("crossing").map(Vec::len), Some(1));
        assert_eq!(grouped.get("counting").map(Vec::len), Some(1));
    }

    #[test]
    fn test_state_transitions() {
        let store = EntityStore::new();
        store.upsert_line("i1", line("l1", LineKind::Crossing));
        store.set_state("i1", EntitySetState::Rebuilding);
        assert_eq!(store.state("i1"), EntitySetState::Rebuilding);
        store.set_state("i1", EntitySetState::Clean);
        assert_eq!(store.state("i1"), EntitySetState::Clean);
    }

    #[test]
    fn test_delete_line_and_cascade() {
        let store = EntityStore::new();
        store.upsert_line("i1", line("l1", LineKind::Crossing));
        assert!(store.delete_line("i1", "l1"));
        assert!(!store.delete_line("i1", "l1"));
        assert!(!store.delete_line("missing", "l1"));

        store.upsert_line("i1", line("l2", LineKind::Tailgating));
        store.remove_instance("i1");
        assert!(store.get("i1").is_none());
    }

    #[test]
    fn test_delete_lines_of_kind() {
        let store = EntityStore::new();
        store.upsert_line("i1", line("l1", LineKind::Crossing));
        store.upsert_line("i1", line("l2", LineKind::Crossing));
        store.upsert_line("i1", line("l3", LineKind::Counting));
        assert_eq!(store.delete_lines_of_kind("i1", LineKind::Crossing), 2);
        assert_eq!(store.get("i1").expect("set").lines.len(), 1);
    }

    #[test]
    fn test_node_params_encoding() {
        let store = EntityStore::new();
        store.upsert_line("i1", line("l1", LineKind::Crossing));
        let params = store.node_params("i1").expect("params");
        let lines: serde_json::Value =
            serde_json::from_str(params.get("lines").expect("lines")).expect("json");
        assert_eq!(lines.as_array().map(Vec::len), Some(1));
        assert_eq!(lines[0]["lineId"], "l1");
    }
}
