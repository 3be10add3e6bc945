//! Recording access.
//!
//! The framework never owns raw signal storage. It reads a recording through
//! the [`Recording`] trait, which exposes the sampling rate, the channel list
//! and its partition into channel groups, and hands out one group's traces at
//! a time.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{Result, SortError};
use crate::mmap_utils::mmap_file;
use crate::types::{ChannelId, GroupId, RecordingInfo};

/// Read-only access to a multi-channel recording
pub trait Recording: Send + Sync {
    fn sampling_rate(&self) -> f64;

    fn num_samples(&self) -> u64;

    fn channel_ids(&self) -> Vec<ChannelId>;

    /// Group names in declared order. Sorting follows this order.
    fn channel_groups(&self) -> Vec<GroupId>;

    fn channels_in(&self, group: &GroupId) -> Vec<ChannelId>;

    /// Traces of every channel in `group`
    fn signal_for(&self, group: &GroupId) -> Result<GroupSignal>;

    /// Inclusive `(0, max_sample_index)`. Only meaningful for recordings with
    /// at least one sample; the orchestrator rejects empty ones.
    fn sample_range(&self) -> (u64, u64) {
        (0, self.num_samples().saturating_sub(1))
    }

    fn info(&self) -> RecordingInfo {
        RecordingInfo {
            sampling_rate: self.sampling_rate(),
            num_samples: self.num_samples(),
            num_channels: self.channel_ids().len(),
        }
    }
}

/// Signal slice for one channel group, channel-major
#[derive(Debug, Clone)]
pub struct GroupSignal {
    pub group: GroupId,
    pub channels: Vec<ChannelId>,
    pub sampling_rate: f64,
    pub traces: Vec<Vec<f32>>,
    /// Probe coordinates in micrometres, one per channel
    pub locations: Option<Vec<[f64; 2]>>,
}

impl GroupSignal {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_samples(&self) -> usize {
        self.traces.first().map(Vec::len).unwrap_or(0)
    }
}

/// Check that the recording has samples and that its groups are non-empty,
/// disjoint and cover every channel.
pub fn validate_partition(recording: &dyn Recording) -> Result<()> {
    if recording.num_samples() == 0 {
        return Err(SortError::InvalidRecording(
            "recording has no samples".to_string(),
        ));
    }

    let all: BTreeSet<ChannelId> = recording.channel_ids().into_iter().collect();
    let groups = recording.channel_groups();

    if groups.is_empty() {
        return Err(SortError::InvalidRecording(
            "recording declares no channel groups".to_string(),
        ));
    }

    let mut seen_groups = BTreeSet::new();
    let mut covered = BTreeSet::new();
    for group in &groups {
        if !seen_groups.insert(group.clone()) {
            return Err(SortError::InvalidRecording(format!(
                "channel group {} declared twice",
                group
            )));
        }
        let channels = recording.channels_in(group);
        if channels.is_empty() {
            return Err(SortError::InvalidRecording(format!(
                "channel group {} is empty",
                group
            )));
        }
        for ch in channels {
            if !all.contains(&ch) {
                return Err(SortError::InvalidRecording(format!(
                    "channel {} of group {} does not exist",
                    ch, group
                )));
            }
            if !covered.insert(ch) {
                return Err(SortError::InvalidRecording(format!(
                    "channel {} belongs to more than one group",
                    ch
                )));
            }
        }
    }

    if let Some(orphan) = all.difference(&covered).next() {
        return Err(SortError::InvalidRecording(format!(
            "channel {} is not assigned to any group",
            orphan
        )));
    }

    Ok(())
}

/// Recording held entirely in memory
#[derive(Debug, Clone)]
pub struct InMemoryRecording {
    sampling_rate: f64,
    traces: Vec<Vec<f32>>,
    groups: Vec<(GroupId, Vec<ChannelId>)>,
    locations: Option<Vec<[f64; 2]>>,
}

impl InMemoryRecording {
    /// Build a recording from channel-major traces. All channels start in a
    /// single group named `0`.
    pub fn new(sampling_rate: f64, traces: Vec<Vec<f32>>) -> Result<Self> {
        if !(sampling_rate.is_finite() && sampling_rate > 0.0) {
            return Err(SortError::InvalidRecording(format!(
                "sampling rate must be positive, got {}",
                sampling_rate
            )));
        }
        if traces.is_empty() {
            return Err(SortError::InvalidRecording(
                "recording has no channels".to_string(),
            ));
        }
        let num_samples = traces[0].len();
        if num_samples == 0 {
            return Err(SortError::InvalidRecording(
                "recording has no samples".to_string(),
            ));
        }
        if let Some((ch, t)) = traces
            .iter()
            .enumerate()
            .find(|(_, t)| t.len() != num_samples)
        {
            return Err(SortError::InvalidRecording(format!(
                "channel {} has {} samples, expected {}",
                ch,
                t.len(),
                num_samples
            )));
        }

        let groups = vec![(GroupId::from(0), (0..traces.len()).collect())];
        Ok(Self {
            sampling_rate,
            traces,
            groups,
            locations: None,
        })
    }

    /// Assign each channel a numeric group label. Groups are ordered by label.
    pub fn with_group_labels(self, labels: &[u32]) -> Result<Self> {
        if labels.len() != self.traces.len() {
            return Err(SortError::InvalidRecording(format!(
                "{} group labels for {} channels",
                labels.len(),
                self.traces.len()
            )));
        }
        let distinct: BTreeSet<u32> = labels.iter().copied().collect();
        let groups = distinct
            .into_iter()
            .map(|label| {
                let channels = labels
                    .iter()
                    .enumerate()
                    .filter(|(_, &l)| l == label)
                    .map(|(ch, _)| ch)
                    .collect();
                (GroupId::from(label), channels)
            })
            .collect();
        self.with_groups(groups)
    }

    /// Replace the partition with explicitly named groups, in the given order.
    pub fn with_groups(mut self, groups: Vec<(GroupId, Vec<ChannelId>)>) -> Result<Self> {
        self.groups = groups;
        validate_partition(&self)?;
        Ok(self)
    }

    pub fn with_locations(mut self, locations: Vec<[f64; 2]>) -> Result<Self> {
        if locations.len() != self.traces.len() {
            return Err(SortError::InvalidRecording(format!(
                "{} locations for {} channels",
                locations.len(),
                self.traces.len()
            )));
        }
        self.locations = Some(locations);
        Ok(self)
    }

    pub fn trace(&self, channel: ChannelId) -> Option<&[f32]> {
        self.traces.get(channel).map(Vec::as_slice)
    }
}

impl Recording for InMemoryRecording {
    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn num_samples(&self) -> u64 {
        self.traces.first().map(|t| t.len() as u64).unwrap_or(0)
    }

    fn channel_ids(&self) -> Vec<ChannelId> {
        (0..self.traces.len()).collect()
    }

    fn channel_groups(&self) -> Vec<GroupId> {
        self.groups.iter().map(|(g, _)| g.clone()).collect()
    }

    fn channels_in(&self, group: &GroupId) -> Vec<ChannelId> {
        self.groups
            .iter()
            .find(|(g, _)| g == group)
            .map(|(_, chs)| chs.clone())
            .unwrap_or_default()
    }

    fn signal_for(&self, group: &GroupId) -> Result<GroupSignal> {
        let channels = self.channels_in(group);
        if channels.is_empty() {
            return Err(SortError::InvalidRecording(format!(
                "unknown channel group {}",
                group
            )));
        }
        let traces = channels.iter().map(|&ch| self.traces[ch].clone()).collect();
        let locations = self
            .locations
            .as_ref()
            .map(|locs| channels.iter().map(|&ch| locs[ch]).collect());

        Ok(GroupSignal {
            group: group.clone(),
            channels,
            sampling_rate: self.sampling_rate,
            traces,
            locations,
        })
    }
}

/// Load a text recording: one row per sample, one column per channel,
/// separated by whitespace or commas. Lines starting with `#` are skipped.
pub fn read_ascii_recording(path: &Path, sampling_rate: f64) -> Result<InMemoryRecording> {
    if !path.exists() {
        return Err(SortError::InvalidRecording(format!(
            "recording file not found: {}",
            path.display()
        )));
    }
    let mmap = mmap_file(path)?;
    let content = std::str::from_utf8(&mmap).map_err(|e| {
        SortError::InvalidRecording(format!("{} is not valid UTF-8: {}", path.display(), e))
    })?;

    let mut traces: Vec<Vec<f32>> = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f32>())
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| {
                SortError::InvalidRecording(format!("line {}: {}", line_no + 1, e))
            })?;

        if traces.is_empty() {
            traces = vec![Vec::new(); values.len()];
        } else if values.len() != traces.len() {
            return Err(SortError::InvalidRecording(format!(
                "line {} has {} columns, expected {}",
                line_no + 1,
                values.len(),
                traces.len()
            )));
        }
        for (trace, v) in traces.iter_mut().zip(values) {
            trace.push(v);
        }
    }

    log::info!(
        "Loaded ASCII recording {}: {} channels",
        path.display(),
        traces.len()
    );

    InMemoryRecording::new(sampling_rate, traces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn flat(channels: usize, samples: usize) -> Vec<Vec<f32>> {
        vec![vec![0.0; samples]; channels]
    }

    #[test]
    fn test_default_single_group() {
        let rec = InMemoryRecording::new(30000.0, flat(4, 10)).unwrap();
        assert_eq!(rec.channel_groups(), vec![GroupId::from(0)]);
        assert_eq!(rec.channels_in(&GroupId::from(0)), vec![0, 1, 2, 3]);
        assert_eq!(rec.sample_range(), (0, 9));
    }

    #[test]
    fn test_group_labels_partition() {
        let rec = InMemoryRecording::new(30000.0, flat(4, 10))
            .unwrap()
            .with_group_labels(&[1, 0, 1, 0])
            .unwrap();
        assert_eq!(rec.channel_groups(), vec![GroupId::from(0), GroupId::from(1)]);
        assert_eq!(rec.channels_in(&GroupId::from(1)), vec![0, 2]);

        let signal = rec.signal_for(&GroupId::from(1)).unwrap();
        assert_eq!(signal.num_channels(), 2);
        assert_eq!(signal.num_samples(), 10);
    }

    #[test]
    fn test_overlapping_groups_rejected() {
        let result = InMemoryRecording::new(30000.0, flat(3, 10))
            .unwrap()
            .with_groups(vec![
                (GroupId::from("a"), vec![0, 1]),
                (GroupId::from("b"), vec![1, 2]),
            ]);
        assert!(matches!(result, Err(SortError::InvalidRecording(_))));
    }

    #[test]
    fn test_uncovered_channel_rejected() {
        let result = InMemoryRecording::new(30000.0, flat(3, 10))
            .unwrap()
            .with_groups(vec![(GroupId::from("a"), vec![0, 1])]);
        assert!(matches!(result, Err(SortError::InvalidRecording(_))));
    }

    #[test]
    fn test_ragged_traces_rejected() {
        let traces = vec![vec![0.0; 10], vec![0.0; 9]];
        assert!(InMemoryRecording::new(1000.0, traces).is_err());
    }

    #[test]
    fn test_zero_samples_rejected() {
        let result = InMemoryRecording::new(1000.0, vec![Vec::new(), Vec::new()]);
        assert!(matches!(result, Err(SortError::InvalidRecording(_))));
    }

    #[test]
    fn test_read_ascii_recording() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# ch0 ch1").unwrap();
        writeln!(file, "1.0, 2.0").unwrap();
        writeln!(file, "3.0 4.0").unwrap();
        file.flush().unwrap();

        let rec = read_ascii_recording(file.path(), 1000.0).unwrap();
        assert_eq!(rec.num_samples(), 2);
        assert_eq!(rec.trace(1), Some(&[2.0f32, 4.0][..]));
    }
}
