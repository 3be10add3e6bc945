//! Backend-agnostic behaviour checks.
//!
//! [`ConformanceSuite`] drives a [`SpikeSorter`] exactly as a caller would and
//! asserts the contract every backend must honour: unique unit ids, complete
//! group coverage, in-range spike trains, fail-fast validation and
//! determinism. The installation probe runs once when the suite is built; a
//! backend that is not installed makes every check return
//! [`SuiteOutcome::Skipped`] instead of failing.
//!
//! Use [`sorter_conformance_suite!`](crate::sorter_conformance_suite) to stamp
//! out one `#[test]` per check for a backend.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::adapter::{AdapterError, RawOutput, RunContext, SorterAdapter};
use crate::backends::BackendDescriptor;
use crate::error::{Result, SortError};
use crate::params::{ParamOverrides, ParamValue};
use crate::recording::{GroupSignal, InMemoryRecording, Recording};
use crate::sorter::{ExecutionMode, SortOptions, SpikeSorter};
use crate::types::{ChannelId, GroupId, SortingResult, UnitId};

/// Samples a detected spike may be off from the injected one
pub const SPIKE_TOLERANCE: u64 = 5;

// =============================================================================
// TOY DATA
// =============================================================================

/// Builder for small synthetic recordings with known spike times
#[derive(Debug, Clone)]
pub struct ToyRecording {
    num_channels: usize,
    num_samples: usize,
    sampling_rate: f64,
    noise: f32,
    seed: u64,
    group_labels: Option<Vec<u32>>,
    injections: Vec<(ChannelId, Vec<usize>, f32)>,
}

impl ToyRecording {
    pub fn new(num_channels: usize, num_samples: usize) -> Self {
        Self {
            num_channels,
            num_samples,
            sampling_rate: 30000.0,
            noise: 1.0,
            seed: 0,
            group_labels: None,
            injections: Vec::new(),
        }
    }

    pub fn sampling_rate(mut self, sampling_rate: f64) -> Self {
        self.sampling_rate = sampling_rate;
        self
    }

    pub fn noise(mut self, amplitude: f32) -> Self {
        self.noise = amplitude;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn groups(mut self, labels: &[u32]) -> Self {
        self.group_labels = Some(labels.to_vec());
        self
    }

    /// Add a negative spike of `amplitude` at each of `samples` on `channel`.
    pub fn inject(mut self, channel: ChannelId, samples: &[usize], amplitude: f32) -> Self {
        self.injections.push((channel, samples.to_vec(), amplitude));
        self
    }

    pub fn build(self) -> Result<InMemoryRecording> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut traces: Vec<Vec<f32>> = (0..self.num_channels)
            .map(|_| {
                (0..self.num_samples)
                    .map(|_| rng.gen_range(-self.noise..=self.noise))
                    .collect()
            })
            .collect();

        // Trough at the spike sample, shoulders either side, small rebound
        const SHAPE: [(isize, f32); 6] =
            [(-1, -0.5), (0, -1.0), (1, -0.5), (2, 0.2), (3, 0.15), (4, 0.1)];
        for (channel, samples, amplitude) in &self.injections {
            let trace = traces.get_mut(*channel).ok_or_else(|| {
                SortError::InvalidRecording(format!("no channel {} to inject into", channel))
            })?;
            for &t in samples {
                for (dt, w) in SHAPE {
                    let idx = t as isize + dt;
                    if idx >= 0 && (idx as usize) < trace.len() {
                        trace[idx as usize] += w * amplitude;
                    }
                }
            }
        }

        let recording = InMemoryRecording::new(self.sampling_rate, traces)?;
        match self.group_labels {
            Some(labels) => recording.with_group_labels(&labels),
            None => Ok(recording),
        }
    }
}

// =============================================================================
// INSTRUMENTATION
// =============================================================================

/// Adapter wrapper counting `run` calls
pub struct CountingAdapter<'a> {
    inner: &'a dyn SorterAdapter,
    runs: AtomicUsize,
}

impl<'a> CountingAdapter<'a> {
    pub fn new(inner: &'a dyn SorterAdapter) -> Self {
        Self {
            inner,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl SorterAdapter for CountingAdapter<'_> {
    fn descriptor(&self) -> &'static BackendDescriptor {
        self.inner.descriptor()
    }

    fn is_installed(&self) -> bool {
        self.inner.is_installed()
    }

    fn run(
        &self,
        signal: &GroupSignal,
        ctx: &RunContext<'_>,
    ) -> std::result::Result<RawOutput, AdapterError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.run(signal, ctx)
    }
}

/// Recording wrapper counting `signal_for` calls
pub struct CountingRecording<R> {
    inner: R,
    reads: AtomicUsize,
}

impl<R: Recording> CountingRecording<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl<R: Recording> Recording for CountingRecording<R> {
    fn sampling_rate(&self) -> f64 {
        self.inner.sampling_rate()
    }

    fn num_samples(&self) -> u64 {
        self.inner.num_samples()
    }

    fn channel_ids(&self) -> Vec<ChannelId> {
        self.inner.channel_ids()
    }

    fn channel_groups(&self) -> Vec<GroupId> {
        self.inner.channel_groups()
    }

    fn channels_in(&self, group: &GroupId) -> Vec<ChannelId> {
        self.inner.channels_in(group)
    }

    fn signal_for(&self, group: &GroupId) -> Result<GroupSignal> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.signal_for(group)
    }
}

// =============================================================================
// INVARIANTS
// =============================================================================

/// Panic unless `result` satisfies the contract of a sorting result for
/// `recording`.
pub fn assert_result_invariants(result: &SortingResult, recording: &dyn Recording) {
    let ids = result.unit_ids();
    let distinct: BTreeSet<UnitId> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), ids.len(), "unit ids are not unique: {:?}", ids);

    let declared: Vec<GroupId> = recording.channel_groups();
    let declared_set: BTreeSet<&GroupId> = declared.iter().collect();
    for unit in result.units() {
        assert!(
            declared_set.contains(&unit.group),
            "unit {} assigned to undeclared group {}",
            unit.id,
            unit.group
        );
        assert_eq!(result.group_of(unit.id), Some(&unit.group));
    }

    let reported: Vec<GroupId> = result.groups().iter().map(|g| g.group.clone()).collect();
    assert_eq!(reported, declared, "result does not cover every group in order");

    let mut claimed = BTreeSet::new();
    for entry in result.groups() {
        for id in &entry.unit_ids {
            assert!(claimed.insert(*id), "unit {} listed in two groups", id);
            assert_eq!(result.group_of(*id), Some(&entry.group));
        }
    }
    assert_eq!(claimed, distinct, "group entries do not list every unit");

    let (lo, hi) = recording.sample_range();
    for unit in result.units() {
        for w in unit.spike_train.windows(2) {
            assert!(w[0] <= w[1], "unit {} spike train is not sorted", unit.id);
        }
        for &t in &unit.spike_train {
            assert!(
                t >= lo && t <= hi,
                "unit {} spike at {} outside [{}, {}]",
                unit.id,
                t,
                lo,
                hi
            );
        }
    }
}

fn covers_within_tolerance(train: &[u64], expected: &[u64]) -> bool {
    expected.iter().all(|&e| {
        let lo = e.saturating_sub(SPIKE_TOLERANCE);
        let hi = e + SPIKE_TOLERANCE;
        let start = train.partition_point(|&t| t < lo);
        train.get(start).is_some_and(|&t| t <= hi)
    })
}

// =============================================================================
// SUITE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteOutcome {
    Passed,
    Skipped,
}

/// Contract checks for one backend
pub struct ConformanceSuite<'a> {
    adapter: &'a dyn SorterAdapter,
    installed: bool,
    sensitive: ParamOverrides,
}

impl<'a> ConformanceSuite<'a> {
    pub fn new(adapter: &'a dyn SorterAdapter) -> Self {
        let installed = adapter.is_installed();
        Self {
            adapter,
            installed,
            sensitive: ParamOverrides::new(),
        }
    }

    /// Parameters that make the backend as sensitive as it can be; used for
    /// checks that look for injected spikes.
    pub fn with_sensitive_params(mut self, overrides: ParamOverrides) -> Self {
        self.sensitive = overrides;
        self
    }

    pub fn installed(&self) -> bool {
        self.installed
    }

    fn name(&self) -> &'static str {
        self.adapter.descriptor().name
    }

    fn skip(&self, check: &str) -> Option<SuiteOutcome> {
        if self.installed {
            None
        } else {
            eprintln!("Skipping {} for '{}': backend not installed", check, self.name());
            Some(SuiteOutcome::Skipped)
        }
    }

    fn sort(&self, recording: &dyn Recording, options: SortOptions) -> SortingResult {
        SpikeSorter::new(self.adapter)
            .with_options(options)
            .sort(recording, &self.sensitive)
            .unwrap_or_else(|e| panic!("'{}' failed to sort: {}", self.name(), e))
    }

    /// One group, four channels, a known train on channel 2.
    pub fn test_on_toy(&self) -> SuiteOutcome {
        if let Some(skipped) = self.skip("test_on_toy") {
            return skipped;
        }
        let expected = [100u64, 250, 400];
        let recording = ToyRecording::new(4, 10_000)
            .seed(1)
            .inject(2, &[100, 250, 400], 30.0)
            .build()
            .unwrap_or_else(|e| panic!("toy recording: {}", e));

        let result = self.sort(&recording, SortOptions::default());
        assert_result_invariants(&result, &recording);

        assert!(
            result
                .units()
                .iter()
                .any(|u| covers_within_tolerance(&u.spike_train, &expected)),
            "no unit of '{}' covers {:?} within +/-{} samples",
            self.name(),
            expected,
            SPIKE_TOLERANCE
        );
        SuiteOutcome::Passed
    }

    /// Two disjoint groups of two channels, sorted in parallel.
    pub fn test_several_groups(&self) -> SuiteOutcome {
        if let Some(skipped) = self.skip("test_several_groups") {
            return skipped;
        }
        let recording = ToyRecording::new(4, 10_000)
            .seed(2)
            .groups(&[0, 0, 1, 1])
            .inject(0, &[500, 2500, 4500], 30.0)
            .inject(3, &[1200, 3200, 7200], 30.0)
            .build()
            .unwrap_or_else(|e| panic!("toy recording: {}", e));

        let options = SortOptions {
            mode: ExecutionMode::Parallel,
            ..SortOptions::default()
        };
        let result = self.sort(&recording, options);
        assert_result_invariants(&result, &recording);

        let g0: BTreeSet<UnitId> = result
            .units_in_group(&GroupId::from(0))
            .iter()
            .copied()
            .collect();
        let g1: BTreeSet<UnitId> = result
            .units_in_group(&GroupId::from(1))
            .iter()
            .copied()
            .collect();
        assert!(g0.is_disjoint(&g1), "unit ids shared across groups");
        assert_eq!(g0.len() + g1.len(), result.num_units());
        SuiteOutcome::Passed
    }

    /// Same input, same output. Backends with inherent randomness only have
    /// to agree on the group layout.
    pub fn test_determinism(&self) -> SuiteOutcome {
        if let Some(skipped) = self.skip("test_determinism") {
            return skipped;
        }
        let recording = ToyRecording::new(4, 10_000)
            .seed(3)
            .groups(&[0, 0, 1, 1])
            .inject(1, &[300, 3300, 6300], 30.0)
            .build()
            .unwrap_or_else(|e| panic!("toy recording: {}", e));

        let first = self.sort(&recording, SortOptions::default());
        let second = self.sort(&recording, SortOptions::default());
        assert_result_invariants(&first, &recording);
        assert_result_invariants(&second, &recording);

        if self.adapter.descriptor().deterministic {
            assert_eq!(first.units(), second.units());
            assert_eq!(first.groups(), second.groups());
        } else {
            assert_eq!(first.groups().len(), second.groups().len());
        }
        SuiteOutcome::Passed
    }

    /// Parallel scheduling must not change ids or trains.
    pub fn test_parallel_matches_sequential(&self) -> SuiteOutcome {
        if let Some(skipped) = self.skip("test_parallel_matches_sequential") {
            return skipped;
        }
        if !self.adapter.descriptor().deterministic {
            return SuiteOutcome::Passed;
        }
        let recording = ToyRecording::new(6, 8_000)
            .seed(4)
            .groups(&[0, 0, 1, 1, 2, 2])
            .inject(0, &[800, 4000], 30.0)
            .inject(5, &[1600, 5000, 7000], 30.0)
            .build()
            .unwrap_or_else(|e| panic!("toy recording: {}", e));

        let sequential = self.sort(&recording, SortOptions::default());
        let parallel = self.sort(
            &recording,
            SortOptions {
                mode: ExecutionMode::Parallel,
                ..SortOptions::default()
            },
        );
        assert_eq!(sequential.units(), parallel.units());
        assert_eq!(sequential.groups(), parallel.groups());
        SuiteOutcome::Passed
    }

    /// An unknown parameter is rejected before the backend is invoked.
    pub fn test_unknown_parameter_fails_fast(&self) -> SuiteOutcome {
        if let Some(skipped) = self.skip("test_unknown_parameter_fails_fast") {
            return skipped;
        }
        let recording = CountingRecording::new(
            ToyRecording::new(2, 1_000)
                .build()
                .unwrap_or_else(|e| panic!("toy recording: {}", e)),
        );
        let counting = CountingAdapter::new(self.adapter);

        let mut overrides = self.sensitive.clone();
        overrides.insert(
            "definitely_not_a_parameter".to_string(),
            ParamValue::Bool(true),
        );
        let err = SpikeSorter::new(&counting)
            .sort(&recording, &overrides)
            .expect_err("unknown parameter accepted");

        assert!(err.is_configuration(), "unexpected error: {}", err);
        assert_eq!(counting.runs(), 0);
        assert_eq!(recording.reads(), 0);
        SuiteOutcome::Passed
    }

    /// Run every check, stopping at the first skip.
    pub fn run_all(&self) -> SuiteOutcome {
        if let Some(skipped) = self.skip("conformance suite") {
            return skipped;
        }
        self.test_on_toy();
        self.test_several_groups();
        self.test_determinism();
        self.test_parallel_matches_sequential();
        self.test_unknown_parameter_fails_fast();
        SuiteOutcome::Passed
    }
}

/// Generate the conformance tests for one backend.
///
/// ```ignore
/// spikesort_rs::sorter_conformance_suite!(threshold, &spikesort_rs::sorters::THRESHOLD);
/// ```
#[macro_export]
macro_rules! sorter_conformance_suite {
    ($name:ident, $adapter:expr) => {
        $crate::sorter_conformance_suite!($name, $adapter, $crate::params::ParamOverrides::new());
    };
    ($name:ident, $adapter:expr, $sensitive:expr) => {
        mod $name {
            #[allow(unused_imports)]
            use super::*;

            fn suite() -> $crate::conformance::ConformanceSuite<'static> {
                $crate::conformance::ConformanceSuite::new($adapter).with_sensitive_params($sensitive)
            }

            #[test]
            fn test_on_toy() {
                suite().test_on_toy();
            }

            #[test]
            fn test_several_groups() {
                suite().test_several_groups();
            }

            #[test]
            fn test_determinism() {
                suite().test_determinism();
            }

            #[test]
            fn test_parallel_matches_sequential() {
                suite().test_parallel_matches_sequential();
            }

            #[test]
            fn test_unknown_parameter_fails_fast() {
                suite().test_unknown_parameter_fails_fast();
            }
        }
    };
}
