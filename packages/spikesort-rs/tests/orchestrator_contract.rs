use std::time::Duration;

use spikesort_rs::adapter::LabeledEvent;
use spikesort_rs::conformance::{
    assert_result_invariants, ConformanceSuite, CountingAdapter, CountingRecording,
    SuiteOutcome, ToyRecording,
};
use spikesort_rs::params::{ParamDefault, ParamKind};
use spikesort_rs::{
    run_sorter, AdapterError, BackendDescriptor, ChannelId, ConfigError, ExecutionCause,
    ExecutionMode, GroupId, GroupSignal, InMemoryRecording, ParamOverrides, ParamSpec,
    ParamValue, RawOutput, Recording, RunContext, SortError, SortOptions, SorterAdapter,
    SpikeSorter, ValidationError,
};

const STUB_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "gain",
    kind: ParamKind::Float { min: 0.0, max: 10.0 },
    default: ParamDefault::Float(1.0),
    documentation: "Unused",
}];

fn yes() -> bool {
    true
}

fn no() -> bool {
    false
}

static STUB: BackendDescriptor = BackendDescriptor {
    name: "stub",
    display_name: "Stub",
    documentation: "Scripted test backend",
    params: STUB_PARAMS,
    emits_spurious_duplicates: false,
    deterministic: true,
    probe: yes,
};

static MISSING: BackendDescriptor = BackendDescriptor {
    name: "missing",
    display_name: "Missing",
    documentation: "Never installed",
    params: STUB_PARAMS,
    emits_spurious_duplicates: false,
    deterministic: true,
    probe: no,
};

type Script = fn(&GroupSignal, &RunContext<'_>) -> Result<RawOutput, AdapterError>;

/// Backend whose output is computed by a plain function of the group signal
struct ScriptedSorter {
    descriptor: &'static BackendDescriptor,
    script: Script,
}

impl SorterAdapter for ScriptedSorter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        self.descriptor
    }

    fn run(&self, signal: &GroupSignal, ctx: &RunContext<'_>) -> Result<RawOutput, AdapterError> {
        (self.script)(signal, ctx)
    }
}

fn scripted(script: Script) -> ScriptedSorter {
    ScriptedSorter {
        descriptor: &STUB,
        script,
    }
}

/// Group "0": labels 7 and 3. Group "1": label 0. Anything else: nothing.
fn two_labels_then_one(signal: &GroupSignal, _: &RunContext<'_>) -> Result<RawOutput, AdapterError> {
    let ev = |sample, label| LabeledEvent {
        channel: 0,
        sample,
        label,
    };
    Ok(match signal.group.as_str() {
        "0" => RawOutput::LabeledEvents(vec![ev(40, 7), ev(10, 3), ev(20, 7)]),
        "1" => RawOutput::LabelTrains(vec![(0, vec![5, 15, 25])]),
        _ => RawOutput::LabelTrains(Vec::new()),
    })
}

fn recording(labels: &[u32]) -> InMemoryRecording {
    ToyRecording::new(labels.len(), 100)
        .groups(labels)
        .build()
        .unwrap()
}

#[test]
fn test_not_installed_reads_nothing() {
    let adapter = ScriptedSorter {
        descriptor: &MISSING,
        script: two_labels_then_one,
    };
    let counting = CountingAdapter::new(&adapter);
    let rec = CountingRecording::new(recording(&[0, 1]));

    let err = SpikeSorter::new(&counting)
        .sort(&rec, &ParamOverrides::new())
        .unwrap_err();

    assert!(matches!(err, SortError::BackendNotInstalled(ref name) if name == "missing"));
    assert_eq!(rec.reads(), 0);
    assert_eq!(counting.runs(), 0);
}

#[test]
fn test_conformance_suite_skips_missing_backend() {
    let adapter = ScriptedSorter {
        descriptor: &MISSING,
        script: two_labels_then_one,
    };
    let counting = CountingAdapter::new(&adapter);
    let suite = ConformanceSuite::new(&counting);

    assert!(!suite.installed());
    assert_eq!(suite.test_on_toy(), SuiteOutcome::Skipped);
    assert_eq!(suite.test_several_groups(), SuiteOutcome::Skipped);
    assert_eq!(suite.test_determinism(), SuiteOutcome::Skipped);
    assert_eq!(suite.test_parallel_matches_sequential(), SuiteOutcome::Skipped);
    assert_eq!(suite.test_unknown_parameter_fails_fast(), SuiteOutcome::Skipped);
    assert_eq!(suite.run_all(), SuiteOutcome::Skipped);
    assert_eq!(counting.runs(), 0);
}

#[test]
fn test_unknown_parameter_fails_before_running() {
    let adapter = scripted(two_labels_then_one);
    let counting = CountingAdapter::new(&adapter);
    let rec = CountingRecording::new(recording(&[0, 1]));

    let mut overrides = ParamOverrides::new();
    overrides.insert("bogus".to_string(), ParamValue::Int(1));
    let err = SpikeSorter::new(&counting).sort(&rec, &overrides).unwrap_err();

    match err {
        SortError::Configuration(ConfigError::Validation(ValidationError::UnknownParameter {
            name,
            ..
        })) => assert_eq!(name, "bogus"),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(counting.runs(), 0);
    assert_eq!(rec.reads(), 0);
}

#[test]
fn test_type_and_range_violations() {
    let adapter = scripted(two_labels_then_one);
    let rec = recording(&[0]);

    let mut overrides = ParamOverrides::new();
    overrides.insert("gain".to_string(), ParamValue::Text("loud".to_string()));
    let err = SpikeSorter::new(&adapter).sort(&rec, &overrides).unwrap_err();
    assert!(matches!(
        err,
        SortError::Configuration(ConfigError::Validation(ValidationError::TypeMismatch { .. }))
    ));

    overrides.insert("gain".to_string(), ParamValue::Float(11.0));
    let err = SpikeSorter::new(&adapter).sort(&rec, &overrides).unwrap_err();
    assert!(matches!(
        err,
        SortError::Configuration(ConfigError::Validation(ValidationError::OutOfRange { .. }))
    ));
}

#[test]
fn test_ids_are_contiguous_across_groups() {
    let adapter = scripted(two_labels_then_one);
    let rec = recording(&[0, 0, 1]);

    let result = SpikeSorter::new(&adapter)
        .sort(&rec, &ParamOverrides::new())
        .unwrap();
    assert_result_invariants(&result, &rec);

    assert_eq!(result.unit_ids(), vec![0, 1, 2]);
    // Backend order within a group: label 7 is reported first
    assert_eq!(result.unit(0).unwrap().native_label, 7);
    assert_eq!(result.unit(1).unwrap().native_label, 3);
    assert_eq!(result.spike_train(0), Some(&[20u64, 40][..]));
    assert_eq!(result.spike_train(1), Some(&[10u64][..]));
    assert_eq!(result.spike_train(2), Some(&[5u64, 15, 25][..]));

    assert_eq!(result.units_in_group(&GroupId::from(0)), &[0, 1]);
    assert_eq!(result.units_in_group(&GroupId::from(1)), &[2]);
    assert_eq!(result.group_of(2), Some(&GroupId::from(1)));
    assert_eq!(result.groups()[0].channels, vec![0, 1]);
    assert_eq!(result.backend(), "stub");
    assert_eq!(result.recording().num_samples, 100);
}

#[test]
fn test_empty_group_still_reported() {
    let adapter = scripted(two_labels_then_one);
    let rec = recording(&[0, 2, 1]);

    let result = SpikeSorter::new(&adapter)
        .sort(&rec, &ParamOverrides::new())
        .unwrap();
    assert_result_invariants(&result, &rec);

    let groups: Vec<&str> = result.groups().iter().map(|g| g.group.as_str()).collect();
    assert_eq!(groups, vec!["0", "1", "2"]);
    assert!(result.units_in_group(&GroupId::from(2)).is_empty());
    assert_eq!(result.num_units(), 3);
}

#[test]
fn test_parallel_matches_sequential() {
    let adapter = scripted(two_labels_then_one);
    let rec = recording(&[0, 1, 2, 0, 1]);

    let sequential = SpikeSorter::new(&adapter)
        .sort(&rec, &ParamOverrides::new())
        .unwrap();
    let parallel = SpikeSorter::new(&adapter)
        .with_options(SortOptions {
            mode: ExecutionMode::Parallel,
            ..SortOptions::default()
        })
        .sort(&rec, &ParamOverrides::new())
        .unwrap();

    assert_eq!(sequential.units(), parallel.units());
    assert_eq!(sequential.groups(), parallel.groups());
    assert_ne!(sequential.id(), parallel.id());
}

fn fails_on_group_one(signal: &GroupSignal, ctx: &RunContext<'_>) -> Result<RawOutput, AdapterError> {
    if signal.group.as_str() == "1" {
        return Err(ExecutionCause::ExitStatus {
            status: "exit status: 1".to_string(),
            stderr: "segfault".to_string(),
        }
        .into());
    }
    two_labels_then_one(signal, ctx)
}

#[test]
fn test_group_failure_fails_whole_sort() {
    let adapter = scripted(fails_on_group_one);
    let rec = recording(&[0, 1]);

    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
        let err = SpikeSorter::new(&adapter)
            .with_options(SortOptions {
                mode,
                ..SortOptions::default()
            })
            .sort(&rec, &ParamOverrides::new())
            .unwrap_err();
        match err {
            SortError::BackendExecution {
                backend,
                group,
                cause: ExecutionCause::ExitStatus { stderr, .. },
            } => {
                assert_eq!(backend, "stub");
                assert_eq!(group, GroupId::from(1));
                assert_eq!(stderr, "segfault");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}

fn rejects(_: &GroupSignal, _: &RunContext<'_>) -> Result<RawOutput, AdapterError> {
    Err(AdapterError::Rejected("gain too spicy".to_string()))
}

#[test]
fn test_backend_rejection_is_configuration_error() {
    let adapter = scripted(rejects);
    let err = SpikeSorter::new(&adapter)
        .sort(&recording(&[0]), &ParamOverrides::new())
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(
        err,
        SortError::Configuration(ConfigError::Rejected { ref reason, .. }) if reason == "gain too spicy"
    ));
}

fn out_of_bounds(_: &GroupSignal, _: &RunContext<'_>) -> Result<RawOutput, AdapterError> {
    Ok(RawOutput::LabelTrains(vec![(0, vec![10, 100])]))
}

#[test]
fn test_out_of_range_spike_is_normalization_error() {
    let adapter = scripted(out_of_bounds);
    let err = SpikeSorter::new(&adapter)
        .sort(&recording(&[0]), &ParamOverrides::new())
        .unwrap_err();
    assert!(matches!(err, SortError::Normalization { .. }), "{}", err);
}

fn slow(_: &GroupSignal, _: &RunContext<'_>) -> Result<RawOutput, AdapterError> {
    std::thread::sleep(Duration::from_millis(200));
    Ok(RawOutput::LabelTrains(Vec::new()))
}

#[test]
fn test_timeout_reported_as_execution_error() {
    let adapter = scripted(slow);
    let err = SpikeSorter::new(&adapter)
        .with_options(SortOptions {
            timeout_secs: Some(0.05),
            ..SortOptions::default()
        })
        .sort(&recording(&[0]), &ParamOverrides::new())
        .unwrap_err();
    assert!(matches!(
        err,
        SortError::BackendExecution {
            cause: ExecutionCause::Timeout(_),
            ..
        }
    ));
}

fn writes_artifact(signal: &GroupSignal, ctx: &RunContext<'_>) -> Result<RawOutput, AdapterError> {
    std::fs::write(ctx.work_dir.join("artifact.txt"), signal.group.as_str())
        .map_err(ExecutionCause::Io)?;
    Ok(RawOutput::LabelTrains(Vec::new()))
}

#[test]
fn test_output_folder_kept_or_cleaned() {
    let adapter = scripted(writes_artifact);
    let rec = recording(&[0, 1]);

    let root = tempfile::tempdir().unwrap();
    SpikeSorter::new(&adapter)
        .with_options(SortOptions {
            output_folder: Some(root.path().to_path_buf()),
            ..SortOptions::default()
        })
        .sort(&rec, &ParamOverrides::new())
        .unwrap();
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

    let result = SpikeSorter::new(&adapter)
        .with_options(SortOptions {
            output_folder: Some(root.path().to_path_buf()),
            keep_output: true,
            ..SortOptions::default()
        })
        .sort(&rec, &ParamOverrides::new())
        .unwrap();
    let run_dir = root
        .path()
        .join(format!("spikesort_stub_{}", result.id()));
    assert!(run_dir.join("group_0").join("artifact.txt").is_file());
    assert!(run_dir.join("group_1").join("artifact.txt").is_file());
}

/// Declares channel 1 in two groups
struct OverlappingRecording;

impl Recording for OverlappingRecording {
    fn sampling_rate(&self) -> f64 {
        1000.0
    }

    fn num_samples(&self) -> u64 {
        10
    }

    fn channel_ids(&self) -> Vec<ChannelId> {
        vec![0, 1, 2]
    }

    fn channel_groups(&self) -> Vec<GroupId> {
        vec![GroupId::from("a"), GroupId::from("b")]
    }

    fn channels_in(&self, group: &GroupId) -> Vec<ChannelId> {
        match group.as_str() {
            "a" => vec![0, 1],
            _ => vec![1, 2],
        }
    }

    fn signal_for(&self, _: &GroupId) -> spikesort_rs::Result<GroupSignal> {
        panic!("signal read from an invalid recording");
    }
}

/// One channel, no samples
struct EmptyRecording;

impl Recording for EmptyRecording {
    fn sampling_rate(&self) -> f64 {
        1000.0
    }

    fn num_samples(&self) -> u64 {
        0
    }

    fn channel_ids(&self) -> Vec<ChannelId> {
        vec![0]
    }

    fn channel_groups(&self) -> Vec<GroupId> {
        vec![GroupId::from(0)]
    }

    fn channels_in(&self, _: &GroupId) -> Vec<ChannelId> {
        vec![0]
    }

    fn signal_for(&self, _: &GroupId) -> spikesort_rs::Result<GroupSignal> {
        panic!("signal read from an empty recording");
    }
}

fn spike_at_zero(_: &GroupSignal, _: &RunContext<'_>) -> Result<RawOutput, AdapterError> {
    Ok(RawOutput::LabelTrains(vec![(0, vec![0])]))
}

#[test]
fn test_empty_recording_rejected_before_running() {
    let adapter = scripted(spike_at_zero);
    let counting = CountingAdapter::new(&adapter);
    let err = SpikeSorter::new(&counting)
        .sort(&EmptyRecording, &ParamOverrides::new())
        .unwrap_err();
    assert!(matches!(err, SortError::InvalidRecording(_)), "{}", err);
    assert_eq!(counting.runs(), 0);
}

#[test]
fn test_overlapping_groups_rejected_before_running() {
    let adapter = scripted(two_labels_then_one);
    let counting = CountingAdapter::new(&adapter);
    let err = SpikeSorter::new(&counting)
        .sort(&OverlappingRecording, &ParamOverrides::new())
        .unwrap_err();
    assert!(matches!(err, SortError::InvalidRecording(_)));
    assert_eq!(counting.runs(), 0);
}

#[test]
fn test_run_sorter_with_registered_backend() {
    let rec = ToyRecording::new(4, 5_000)
        .seed(7)
        .groups(&[0, 0, 1, 1])
        .inject(3, &[1000, 2000, 3000], 30.0)
        .build()
        .unwrap();

    let result = run_sorter("threshold", &rec, &ParamOverrides::new(), SortOptions::default())
        .unwrap();
    assert_result_invariants(&result, &rec);
    let ids = result.units_in_group(&GroupId::from(1));
    assert_eq!(ids.len(), 1);
    assert_eq!(result.spike_train(ids[0]), Some(&[1000u64, 2000, 3000][..]));

    assert!(matches!(
        run_sorter("nope", &rec, &ParamOverrides::new(), SortOptions::default()),
        Err(SortError::UnknownBackend(_))
    ));
}
