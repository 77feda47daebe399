//! Equipment directory: registered equipment and their threshold rules
//!
//! Rule lookup order is equipment id, then equipment type, then the built-in
//! defaults when enabled.

use crate::threshold::{default_rules, ThresholdRule};
use parking_lot::RwLock;
use plantmon_types::SensorType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Read-only view of equipment metadata used by the pipeline.
#[cfg_attr(test, mockall::automock)]
pub trait EquipmentDirectory: Send + Sync {
    fn threshold_rule(&self, equipment_id: &str, sensor: SensorType) -> Option<ThresholdRule>;

    fn equipment_exists(&self, equipment_id: &str) -> bool;
}

/// Registered piece of equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub equipment_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl Equipment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            equipment_type: None,
            location: None,
        }
    }
}

#[derive(Default)]
struct DirectoryState {
    equipment: HashMap<String, Equipment>,
    by_equipment: HashMap<(String, SensorType), ThresholdRule>,
    by_type: HashMap<(String, SensorType), ThresholdRule>,
    defaults: HashMap<SensorType, ThresholdRule>,
}

/// In-process directory, filled from configuration and updatable at runtime.
#[derive(Default)]
pub struct StaticDirectory {
    state: RwLock<DirectoryState>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that falls back to the graded default rule for every sensor.
    pub fn with_default_rules() -> Self {
        let directory = Self::new();
        {
            let mut state = directory.state.write();
            for rule in default_rules() {
                state.defaults.insert(rule.sensor_type, rule);
            }
        }
        directory
    }

    pub fn add_equipment(&self, id: impl Into<String>, equipment_type: Option<&str>) {
        let mut equipment = Equipment::new(id);
        equipment.equipment_type = equipment_type.map(str::to_string);
        self.register(equipment);
    }

    pub fn register(&self, equipment: Equipment) {
        self.state
            .write()
            .equipment
            .insert(equipment.id.clone(), equipment);
    }

    pub fn equipment(&self, equipment_id: &str) -> Option<Equipment> {
        self.state.read().equipment.get(equipment_id).cloned()
    }

    pub fn equipment_count(&self) -> usize {
        self.state.read().equipment.len()
    }

    /// Rule for one piece of equipment; beats type and default rules.
    pub fn set_equipment_rule(&self, equipment_id: impl Into<String>, rule: ThresholdRule) {
        let key = (equipment_id.into(), rule.sensor_type);
        self.state.write().by_equipment.insert(key, rule);
    }

    /// Rule shared by every equipment of a type.
    pub fn set_type_rule(&self, equipment_type: impl Into<String>, rule: ThresholdRule) {
        let key = (equipment_type.into(), rule.sensor_type);
        self.state.write().by_type.insert(key, rule);
    }

    pub fn set_default_rule(&self, rule: ThresholdRule) {
        self.state.write().defaults.insert(rule.sensor_type, rule);
    }

    /// Drop a per-equipment rule so lookups fall through again.
    pub fn clear_equipment_rule(&self, equipment_id: &str, sensor: SensorType) -> bool {
        self.state
            .write()
            .by_equipment
            .remove(&(equipment_id.to_string(), sensor))
            .is_some()
    }
}

impl EquipmentDirectory for StaticDirectory {
    fn threshold_rule(&self, equipment_id: &str, sensor: SensorType) -> Option<ThresholdRule> {
        let state = self.state.read();

        if let Some(rule) = state.by_equipment.get(&(equipment_id.to_string(), sensor)) {
            return Some(rule.clone());
        }

        let by_type = state
            .equipment
            .get(equipment_id)
            .and_then(|e| e.equipment_type.as_ref())
            .and_then(|t| state.by_type.get(&(t.clone(), sensor)));
        if let Some(rule) = by_type {
            return Some(rule.clone());
        }

        state.defaults.get(&sensor).cloned()
    }

    fn equipment_exists(&self, equipment_id: &str) -> bool {
        self.state.read().equipment.contains_key(equipment_id)
    }
}
