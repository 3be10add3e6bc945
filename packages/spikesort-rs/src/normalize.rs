//! Conversion of backend-native output into [`Unit`]s.

use std::collections::HashMap;

use crate::adapter::RawOutput;
use crate::backends::BackendDescriptor;
use crate::error::{Result, SortError};
use crate::types::{AnomalyKind, GroupId, TimestampAnomaly, Unit, UnitId};

/// Units of one group together with the irregularities found in them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedGroup {
    pub units: Vec<Unit>,
    pub anomalies: Vec<TimestampAnomaly>,
}

/// Turn one group's raw output into units with ids `id_offset..`.
///
/// Units keep the order in which the backend first reports their labels.
/// Each spike train is returned sorted; reordering and duplicate samples are
/// reported as anomalies. A sample outside `0..=max_sample_index` fails the
/// whole group.
pub fn normalize(
    raw: RawOutput,
    descriptor: &BackendDescriptor,
    group: &GroupId,
    id_offset: UnitId,
    max_sample_index: u64,
) -> Result<NormalizedGroup> {
    let fail = |reason: String| SortError::Normalization {
        backend: descriptor.name.to_string(),
        group: group.clone(),
        reason,
    };

    let mut by_label: Vec<(i64, Vec<i64>)> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut collect = |label: i64, samples: &mut dyn Iterator<Item = i64>| {
        let slot = *index.entry(label).or_insert_with(|| {
            by_label.push((label, Vec::new()));
            by_label.len() - 1
        });
        by_label[slot].1.extend(samples);
    };
    match raw {
        RawOutput::LabeledEvents(events) => {
            for ev in events {
                collect(ev.label, &mut std::iter::once(ev.sample));
            }
        }
        RawOutput::LabelTrains(trains) => {
            for (label, samples) in trains {
                collect(label, &mut samples.into_iter());
            }
        }
    }

    let mut out = NormalizedGroup::default();
    for (idx, (label, samples)) in by_label.into_iter().enumerate() {
        let id = UnitId::try_from(idx)
            .ok()
            .and_then(|i| id_offset.checked_add(i))
            .ok_or_else(|| fail(format!("unit id overflow at label {}", label)))?;

        let mut train = Vec::with_capacity(samples.len());
        let mut running_max = 0u64;
        for sample in samples {
            let s = u64::try_from(sample)
                .ok()
                .filter(|&s| s <= max_sample_index)
                .ok_or_else(|| {
                    fail(format!(
                        "unit label {} has spike at sample {} outside [0, {}]",
                        label, sample, max_sample_index
                    ))
                })?;
            if s < running_max {
                out.anomalies.push(TimestampAnomaly {
                    unit_id: id,
                    kind: AnomalyKind::OutOfOrder,
                    sample: s,
                });
            }
            running_max = running_max.max(s);
            train.push(s);
        }
        train.sort_unstable();

        let before = train.len();
        let mut deduped: Vec<u64> = Vec::with_capacity(before);
        for s in train {
            if deduped.last() == Some(&s) {
                if descriptor.emits_spurious_duplicates {
                    out.anomalies.push(TimestampAnomaly {
                        unit_id: id,
                        kind: AnomalyKind::DuplicateRemoved,
                        sample: s,
                    });
                    continue;
                }
                out.anomalies.push(TimestampAnomaly {
                    unit_id: id,
                    kind: AnomalyKind::Duplicate,
                    sample: s,
                });
            }
            deduped.push(s);
        }
        if deduped.len() != before {
            log::debug!(
                "Dropped {} duplicate spikes from unit {} ({} label {})",
                before - deduped.len(),
                id,
                descriptor.name,
                label
            );
        }

        out.units.push(Unit {
            id,
            group: group.clone(),
            native_label: label,
            spike_train: deduped,
        });
    }

    if !out.anomalies.is_empty() {
        log::warn!(
            "{} timestamp anomalies in output of '{}' for group {}",
            out.anomalies.len(),
            descriptor.name,
            group
        );
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::LabeledEvent;

    fn descriptor(spurious: bool) -> BackendDescriptor {
        BackendDescriptor {
            name: "stub",
            display_name: "Stub",
            documentation: "",
            params: &[],
            emits_spurious_duplicates: spurious,
            deterministic: true,
            probe: || true,
        }
    }

    fn ev(sample: i64, label: i64) -> LabeledEvent {
        LabeledEvent {
            channel: 0,
            sample,
            label,
        }
    }

    #[test]
    fn test_ids_start_at_offset_in_first_appearance_order() {
        let raw = RawOutput::LabeledEvents(vec![ev(30, 7), ev(10, 2), ev(20, 7)]);
        let out = normalize(raw, &descriptor(false), &GroupId::from(1), 5, 100).unwrap();

        assert_eq!(out.units.len(), 2);
        assert_eq!(out.units[0].id, 5);
        assert_eq!(out.units[0].native_label, 7);
        assert_eq!(out.units[0].spike_train, vec![20, 30]);
        assert_eq!(out.units[1].id, 6);
        assert_eq!(out.units[1].native_label, 2);
        assert!(out.units.iter().all(|u| u.group == GroupId::from(1)));
    }

    #[test]
    fn test_label_trains_keep_backend_order() {
        let raw = RawOutput::LabelTrains(vec![(7, vec![1]), (2, vec![2]), (7, vec![3])]);
        let out = normalize(raw, &descriptor(false), &GroupId::from(0), 0, 100).unwrap();

        let ids_to_labels: Vec<(UnitId, i64)> =
            out.units.iter().map(|u| (u.id, u.native_label)).collect();
        assert_eq!(ids_to_labels, vec![(0, 7), (1, 2)]);
        assert_eq!(out.units[0].spike_train, vec![1, 3]);
    }

    #[test]
    fn test_out_of_order_sorted_and_flagged() {
        let raw = RawOutput::LabelTrains(vec![(0, vec![50, 10, 60])]);
        let out = normalize(raw, &descriptor(false), &GroupId::from(0), 0, 100).unwrap();

        assert_eq!(out.units[0].spike_train, vec![10, 50, 60]);
        assert_eq!(
            out.anomalies,
            vec![TimestampAnomaly {
                unit_id: 0,
                kind: AnomalyKind::OutOfOrder,
                sample: 10
            }]
        );
    }

    #[test]
    fn test_duplicates_kept_and_flagged() {
        let raw = RawOutput::LabelTrains(vec![(0, vec![10, 10, 20])]);
        let out = normalize(raw, &descriptor(false), &GroupId::from(0), 0, 100).unwrap();

        assert_eq!(out.units[0].spike_train, vec![10, 10, 20]);
        assert_eq!(out.anomalies.len(), 1);
        assert_eq!(out.anomalies[0].kind, AnomalyKind::Duplicate);
    }

    #[test]
    fn test_spurious_duplicates_removed() {
        let raw = RawOutput::LabelTrains(vec![(0, vec![10, 10, 20])]);
        let out = normalize(raw, &descriptor(true), &GroupId::from(0), 0, 100).unwrap();

        assert_eq!(out.units[0].spike_train, vec![10, 20]);
        assert_eq!(out.anomalies[0].kind, AnomalyKind::DuplicateRemoved);
    }

    #[test]
    fn test_sample_past_end_fails() {
        let raw = RawOutput::LabeledEvents(vec![ev(101, 0)]);
        let err = normalize(raw, &descriptor(false), &GroupId::from(0), 0, 100).unwrap_err();
        assert!(matches!(err, SortError::Normalization { .. }));
    }

    #[test]
    fn test_negative_sample_fails() {
        let raw = RawOutput::LabeledEvents(vec![ev(-1, 0)]);
        assert!(normalize(raw, &descriptor(false), &GroupId::from(0), 0, 100).is_err());
    }

    #[test]
    fn test_boundary_samples_accepted() {
        let raw = RawOutput::LabeledEvents(vec![ev(0, 0), ev(100, 0)]);
        let out = normalize(raw, &descriptor(false), &GroupId::from(0), 0, 100).unwrap();
        assert_eq!(out.units[0].spike_train, vec![0, 100]);
    }

    #[test]
    fn test_empty_output_gives_no_units() {
        let raw = RawOutput::LabeledEvents(Vec::new());
        let out = normalize(raw, &descriptor(false), &GroupId::from(0), 3, 100).unwrap();
        assert!(out.units.is_empty());
    }
}
