//! HerdingSpikes 2 adapter.
//!
//! HerdingSpikes is a Python package, so this adapter drives it through a small
//! bridge script: the group's traces are written as raw `float32` next to a
//! JSON request, the script runs detection and clustering and writes a spike
//! table (`sample channel label`) that is read back through a memory map.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use serde::Serialize;

use crate::adapter::{run_process, AdapterError, RawOutput, RunContext, SorterAdapter};
use crate::backends::{find_python, BackendDescriptor};
use crate::error::ExecutionCause;
use crate::mmap_utils::mmap_file;
use crate::params::{ParamDefault, ParamKind, ParamSpec, RunConfig};
use crate::parser::parse_spike_table;
use crate::recording::GroupSignal;

const BRIDGE_SCRIPT: &str = include_str!("../../resources/herdingspikes_bridge.py");

const SIGNAL_FILE: &str = "traces.raw";
const REQUEST_FILE: &str = "request.json";
const SPIKES_FILE: &str = "spikes.txt";
/// Written by the bridge when HerdingSpikes refuses the parameters
const REJECTED_FILE: &str = "rejected.txt";

/// Electrode pitch used when the recording carries no probe geometry
const DEFAULT_PITCH_UM: f64 = 20.0;

const PARAMS: &[ParamSpec] = &[
    // clustering
    ParamSpec {
        name: "clustering_bandwidth",
        kind: ParamKind::Float { min: 0.1, max: 1000.0 },
        default: ParamDefault::Float(6.0),
        documentation: "Mean-shift kernel bandwidth",
    },
    ParamSpec {
        name: "clustering_alpha",
        kind: ParamKind::Float { min: 0.0, max: 1000.0 },
        default: ParamDefault::Float(6.0),
        documentation: "Weight of waveform shape features relative to location",
    },
    ParamSpec {
        name: "clustering_n_jobs",
        kind: ParamKind::Int { min: -1, max: 1024 },
        default: ParamDefault::Int(-1),
        documentation: "Worker processes for clustering, -1 for all cores",
    },
    ParamSpec {
        name: "clustering_bin_seeding",
        kind: ParamKind::Bool,
        default: ParamDefault::Bool(false),
        documentation: "Seed mean-shift from binned points",
    },
    ParamSpec {
        name: "clustering_subset",
        kind: ParamKind::OptionalInt { min: 1, max: i64::MAX },
        default: ParamDefault::Unset,
        documentation: "Cluster only this many spikes and assign the rest",
    },
    // detection
    ParamSpec {
        name: "left_cutout_time",
        kind: ParamKind::Float { min: 0.0, max: 100.0 },
        default: ParamDefault::Float(1.0),
        documentation: "Waveform cutout before the peak, ms",
    },
    ParamSpec {
        name: "right_cutout_time",
        kind: ParamKind::Float { min: 0.0, max: 100.0 },
        default: ParamDefault::Float(2.2),
        documentation: "Waveform cutout after the peak, ms",
    },
    ParamSpec {
        name: "detection_threshold",
        kind: ParamKind::Int { min: 1, max: 10_000 },
        default: ParamDefault::Int(20),
        documentation: "Detection threshold in scaled amplitude units",
    },
    ParamSpec {
        name: "probe_masked_channels",
        kind: ParamKind::IntList,
        default: ParamDefault::EmptyList,
        documentation: "Group-relative channel indices to ignore",
    },
    ParamSpec {
        name: "probe_inner_radius",
        kind: ParamKind::Float { min: 0.0, max: 10_000.0 },
        default: ParamDefault::Float(75.0),
        documentation: "Radius for spike localisation, um",
    },
    ParamSpec {
        name: "probe_neighbor_radius",
        kind: ParamKind::Float { min: 0.0, max: 10_000.0 },
        default: ParamDefault::Float(90.0),
        documentation: "Radius for neighbouring channels, um",
    },
    ParamSpec {
        name: "probe_event_length",
        kind: ParamKind::Float { min: 0.0, max: 100.0 },
        default: ParamDefault::Float(0.25),
        documentation: "Duration of a spike event, ms",
    },
    ParamSpec {
        name: "probe_peak_jitter",
        kind: ParamKind::Float { min: 0.0, max: 100.0 },
        default: ParamDefault::Float(0.2),
        documentation: "Maximum peak misalignment across channels, ms",
    },
    ParamSpec {
        name: "t_inc",
        kind: ParamKind::Int { min: 1, max: i64::MAX },
        default: ParamDefault::Int(100_000),
        documentation: "Samples processed per detection chunk",
    },
    ParamSpec {
        name: "num_com_centers",
        kind: ParamKind::Int { min: 1, max: 16 },
        default: ParamDefault::Int(1),
        documentation: "Centres of mass used for localisation",
    },
    ParamSpec {
        name: "maa",
        kind: ParamKind::Int { min: 0, max: 10_000 },
        default: ParamDefault::Int(12),
        documentation: "Minimum average amplitude",
    },
    ParamSpec {
        name: "ahpthr",
        kind: ParamKind::Int { min: 0, max: 10_000 },
        default: ParamDefault::Int(11),
        documentation: "After-hyperpolarisation threshold",
    },
    ParamSpec {
        name: "decay_filtering",
        kind: ParamKind::Bool,
        default: ParamDefault::Bool(false),
        documentation: "Drop events with slow amplitude decay",
    },
    ParamSpec {
        name: "amp_evaluation_time",
        kind: ParamKind::Float { min: 0.0, max: 100.0 },
        default: ParamDefault::Float(0.4),
        documentation: "Window for amplitude evaluation, ms",
    },
    ParamSpec {
        name: "spk_evaluation_time",
        kind: ParamKind::Float { min: 0.0, max: 100.0 },
        default: ParamDefault::Float(1.0),
        documentation: "Window for spike shape evaluation, ms",
    },
    // feature extraction
    ParamSpec {
        name: "pca_ncomponents",
        kind: ParamKind::Int { min: 1, max: 64 },
        default: ParamDefault::Int(2),
        documentation: "PCA components of waveform features",
    },
    ParamSpec {
        name: "pca_whiten",
        kind: ParamKind::Bool,
        default: ParamDefault::Bool(true),
        documentation: "Whiten PCA features",
    },
    // preprocessing
    ParamSpec {
        name: "freq_min",
        kind: ParamKind::Float { min: 0.0, max: 100_000.0 },
        default: ParamDefault::Float(300.0),
        documentation: "Band-pass low cutoff, Hz",
    },
    ParamSpec {
        name: "freq_max",
        kind: ParamKind::Float { min: 0.0, max: 100_000.0 },
        default: ParamDefault::Float(6000.0),
        documentation: "Band-pass high cutoff, Hz",
    },
    ParamSpec {
        name: "filter",
        kind: ParamKind::Bool,
        default: ParamDefault::Bool(true),
        documentation: "Band-pass filter before detection",
    },
    ParamSpec {
        name: "pre_scale",
        kind: ParamKind::Bool,
        default: ParamDefault::Bool(true),
        documentation: "Normalise channels by their noise level",
    },
    ParamSpec {
        name: "pre_scale_value",
        kind: ParamKind::Float { min: 0.0, max: 10_000.0 },
        default: ParamDefault::Float(20.0),
        documentation: "Target noise level after scaling",
    },
    ParamSpec {
        name: "filter_duplicates",
        kind: ParamKind::Bool,
        default: ParamDefault::Bool(true),
        documentation: "Remove spikes detected twice on neighbouring channels",
    },
];

pub static HERDINGSPIKES_DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    name: "herdingspikes",
    display_name: "HerdingSpikes 2",
    documentation: "Detection with spatial localisation followed by mean-shift clustering of location and shape features. Requires the Python packages herdingspikes and spikeextractors.",
    params: PARAMS,
    emits_spurious_duplicates: true,
    deterministic: false,
    probe: herdingspikes_installed,
};

/// Interpreter able to import HerdingSpikes, looked up once per process
fn herdingspikes_python() -> Option<&'static Path> {
    static PYTHON: OnceLock<Option<PathBuf>> = OnceLock::new();
    PYTHON
        .get_or_init(|| {
            let python = find_python(None)?;
            let ok = Command::new(&python)
                .args(["-c", "import herdingspikes, spikeextractors"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false);
            if ok {
                log::info!("HerdingSpikes available via {}", python.display());
                Some(python)
            } else {
                log::debug!("HerdingSpikes not importable from {}", python.display());
                None
            }
        })
        .as_deref()
}

fn herdingspikes_installed() -> bool {
    herdingspikes_python().is_some()
}

#[derive(Serialize)]
struct BridgeRequest<'a> {
    traces_path: &'a Path,
    output_path: &'a Path,
    rejected_path: &'a Path,
    work_dir: &'a Path,
    num_channels: usize,
    num_samples: usize,
    sampling_rate: f64,
    locations: Vec<[f64; 2]>,
    params: &'a RunConfig,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HerdingSpikesSorter;

pub static HERDINGSPIKES: HerdingSpikesSorter = HerdingSpikesSorter;

impl HerdingSpikesSorter {
    /// Write traces sample-major (`[t][channel]`) as little-endian `float32`.
    fn write_traces(signal: &GroupSignal, path: &Path) -> std::io::Result<()> {
        let mut out = BufWriter::new(std::fs::File::create(path)?);
        for t in 0..signal.num_samples() {
            for trace in &signal.traces {
                out.write_all(&trace[t].to_le_bytes())?;
            }
        }
        out.flush()
    }

    fn locations(signal: &GroupSignal) -> Vec<[f64; 2]> {
        signal.locations.clone().unwrap_or_else(|| {
            (0..signal.num_channels())
                .map(|i| [0.0, i as f64 * DEFAULT_PITCH_UM])
                .collect()
        })
    }
}

impl SorterAdapter for HerdingSpikesSorter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        &HERDINGSPIKES_DESCRIPTOR
    }

    fn run(&self, signal: &GroupSignal, ctx: &RunContext<'_>) -> Result<RawOutput, AdapterError> {
        let python = herdingspikes_python().ok_or(ExecutionCause::NotInstalled)?;

        let traces_path = ctx.work_dir.join(SIGNAL_FILE);
        let request_path = ctx.work_dir.join(REQUEST_FILE);
        let output_path = ctx.work_dir.join(SPIKES_FILE);
        let rejected_path = ctx.work_dir.join(REJECTED_FILE);
        let script_path = ctx.work_dir.join("herdingspikes_bridge.py");

        Self::write_traces(signal, &traces_path).map_err(ExecutionCause::Io)?;

        let request = BridgeRequest {
            traces_path: &traces_path,
            output_path: &output_path,
            rejected_path: &rejected_path,
            work_dir: ctx.work_dir,
            num_channels: signal.num_channels(),
            num_samples: signal.num_samples(),
            sampling_rate: signal.sampling_rate,
            locations: Self::locations(signal),
            params: ctx.config,
        };
        let request_json = serde_json::to_string_pretty(&request)
            .map_err(|e| ExecutionCause::MalformedOutput(format!("request serialization: {}", e)))?;
        std::fs::write(&request_path, request_json).map_err(ExecutionCause::Io)?;
        std::fs::write(&script_path, BRIDGE_SCRIPT).map_err(ExecutionCause::Io)?;

        log::info!(
            "Running HerdingSpikes on group {} ({} channels, {} samples)",
            signal.group,
            signal.num_channels(),
            signal.num_samples()
        );

        let mut command = Command::new(python);
        command.arg(&script_path).arg(&request_path);

        crate::profile_scope!(format!("herdingspikes bridge, group {}", signal.group));
        if let Err(cause) = run_process(command, ctx.timeout, ctx.work_dir) {
            if let Ok(reason) = std::fs::read_to_string(&rejected_path) {
                return Err(AdapterError::Rejected(reason.trim().to_string()));
            }
            return Err(cause.into());
        }

        if !output_path.exists() {
            return Err(ExecutionCause::OutputMissing(output_path).into());
        }
        let mmap = mmap_file(&output_path)
            .map_err(|e| ExecutionCause::MalformedOutput(e.to_string()))?;
        let events = parse_spike_table(&mmap)?;

        if let Some(bad) = events.iter().find(|e| e.channel >= signal.num_channels()) {
            return Err(ExecutionCause::MalformedOutput(format!(
                "event on channel {} but group has {} channels",
                bad.channel,
                signal.num_channels()
            ))
            .into());
        }

        log::info!("HerdingSpikes reported {} events", events.len());
        Ok(RawOutput::LabeledEvents(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupId;

    fn signal() -> GroupSignal {
        GroupSignal {
            group: GroupId::from(0),
            channels: vec![4, 5],
            sampling_rate: 30000.0,
            traces: vec![vec![1.0, 2.0, 3.0], vec![-1.0, -2.0, -3.0]],
            locations: None,
        }
    }

    #[test]
    fn test_traces_written_sample_major() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SIGNAL_FILE);
        HerdingSpikesSorter::write_traces(&signal(), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(values, vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
    }

    #[test]
    fn test_default_geometry_is_linear() {
        let locs = HerdingSpikesSorter::locations(&signal());
        assert_eq!(locs, vec![[0.0, 0.0], [0.0, DEFAULT_PITCH_UM]]);
    }

    #[test]
    fn test_schema_defaults_validate() {
        let config = HERDINGSPIKES_DESCRIPTOR.default_configuration();
        assert_eq!(config.get_i64("detection_threshold"), Some(20));
        assert_eq!(config.get_bool("filter_duplicates"), Some(true));
    }

    #[test]
    fn test_probe_does_not_panic() {
        let first = HERDINGSPIKES.is_installed();
        assert_eq!(first, HERDINGSPIKES.is_installed());
    }
}
