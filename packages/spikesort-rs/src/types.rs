use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel index as exposed by the recording.
pub type ChannelId = usize;

/// Globally unique unit identifier within one sorting result.
pub type UnitId = u32;

/// Name of a channel group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u32> for GroupId {
    fn from(n: u32) -> Self {
        Self(n.to_string())
    }
}

/// A detected cluster of spike events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub group: GroupId,
    /// Label the backend used for this unit inside its group
    pub native_label: i64,
    /// Sample indices, non-decreasing
    pub spike_train: Vec<u64>,
}

impl Unit {
    pub fn num_spikes(&self) -> usize {
        self.spike_train.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Same sample reported twice for one unit; kept in the train
    Duplicate,
    /// Same sample reported twice by a backend known to emit spurious copies; dropped
    DuplicateRemoved,
    /// Backend reported this sample after a later one; train was reordered
    OutOfOrder,
}

/// Irregularity found while normalizing a backend's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampAnomaly {
    pub unit_id: UnitId,
    pub kind: AnomalyKind,
    pub sample: u64,
}

/// Units produced for one processed channel group. Present even when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub group: GroupId,
    pub channels: Vec<ChannelId>,
    pub unit_ids: Vec<UnitId>,
}

/// Summary of the recording a result was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub sampling_rate: f64,
    pub num_samples: u64,
    pub num_channels: usize,
}

impl RecordingInfo {
    pub fn max_sample_index(&self) -> u64 {
        self.num_samples.saturating_sub(1)
    }
}

/// Standardized, immutable output of one `sort` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortingResult {
    id: String,
    backend: String,
    recording: RecordingInfo,
    units: Vec<Unit>,
    groups: Vec<GroupEntry>,
    anomalies: Vec<TimestampAnomaly>,
    created_at: String,
}

impl SortingResult {
    pub(crate) fn new(
        id: String,
        backend: String,
        recording: RecordingInfo,
        units: Vec<Unit>,
        groups: Vec<GroupEntry>,
        anomalies: Vec<TimestampAnomaly>,
    ) -> Self {
        Self {
            id,
            backend,
            recording,
            units,
            groups,
            anomalies,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn recording(&self) -> &RecordingInfo {
        &self.recording
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    /// Units in group order, then backend label order
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.iter().map(|u| u.id).collect()
    }

    /// Lookup by id. Does not rely on `units()` being ordered, so results
    /// loaded from edited JSON still resolve correctly.
    pub fn unit(&self, unit_id: UnitId) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == unit_id)
    }

    pub fn spike_train(&self, unit_id: UnitId) -> Option<&[u64]> {
        self.unit(unit_id).map(|u| u.spike_train.as_slice())
    }

    pub fn group_of(&self, unit_id: UnitId) -> Option<&GroupId> {
        self.unit(unit_id).map(|u| &u.group)
    }

    /// One entry per processed group, in the recording's group order
    pub fn groups(&self) -> &[GroupEntry] {
        &self.groups
    }

    pub fn units_in_group(&self, group: &GroupId) -> &[UnitId] {
        self.groups
            .iter()
            .find(|g| &g.group == group)
            .map(|g| g.unit_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn anomalies(&self) -> &[TimestampAnomaly] {
        &self.anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> SortingResult {
        let g0 = GroupId::from(0);
        let g1 = GroupId::from(1);
        SortingResult::new(
            "run".to_string(),
            "threshold".to_string(),
            RecordingInfo {
                sampling_rate: 30000.0,
                num_samples: 1000,
                num_channels: 4,
            },
            vec![
                Unit {
                    id: 0,
                    group: g0.clone(),
                    native_label: 3,
                    spike_train: vec![10, 20],
                },
                Unit {
                    id: 1,
                    group: g1.clone(),
                    native_label: 0,
                    spike_train: vec![5],
                },
            ],
            vec![
                GroupEntry {
                    group: g0,
                    channels: vec![0, 1],
                    unit_ids: vec![0],
                },
                GroupEntry {
                    group: g1,
                    channels: vec![2, 3],
                    unit_ids: vec![1],
                },
            ],
            Vec::new(),
        )
    }

    #[test]
    fn test_lookup_by_unit_id() {
        let result = sample_result();
        assert_eq!(result.spike_train(0), Some(&[10u64, 20][..]));
        assert_eq!(result.group_of(1), Some(&GroupId::from(1)));
        assert!(result.spike_train(7).is_none());
    }

    #[test]
    fn test_lookup_in_unordered_loaded_result() {
        let mut json = serde_json::to_value(sample_result()).unwrap();
        json["units"].as_array_mut().unwrap().reverse();
        let loaded: SortingResult = serde_json::from_value(json).unwrap();

        assert_eq!(loaded.units()[0].id, 1);
        assert_eq!(loaded.spike_train(0), Some(&[10u64, 20][..]));
        assert_eq!(loaded.group_of(1), Some(&GroupId::from(1)));
    }

    #[test]
    fn test_units_in_unknown_group_is_empty() {
        let result = sample_result();
        assert!(result.units_in_group(&GroupId::from("missing")).is_empty());
        assert_eq!(result.units_in_group(&GroupId::from(0)), &[0]);
    }

    #[test]
    fn test_max_sample_index() {
        let result = sample_result();
        assert_eq!(result.recording().max_sample_index(), 999);
    }
}
