//! Built-in amplitude threshold detector.
//!
//! Runs in-process, so it is always installed. Each channel of a group becomes
//! at most one unit, labelled by the channel's position in the group. Output is
//! fully deterministic.

use std::time::Instant;

use crate::adapter::{AdapterError, RawOutput, RunContext, SorterAdapter};
use crate::backends::BackendDescriptor;
use crate::params::{ParamDefault, ParamKind, ParamSpec};
use crate::recording::GroupSignal;

/// MAD to standard deviation for Gaussian noise
const MAD_SCALE: f32 = 0.6745;

const PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "detect_threshold",
        kind: ParamKind::Float { min: 0.5, max: 100.0 },
        default: ParamDefault::Float(5.0),
        documentation: "Detection threshold in multiples of the channel's noise level",
    },
    ParamSpec {
        name: "detect_sign",
        kind: ParamKind::Choice(&["neg", "pos", "both"]),
        default: ParamDefault::Text("neg"),
        documentation: "Polarity of peaks to detect",
    },
    ParamSpec {
        name: "refractory_ms",
        kind: ParamKind::Float { min: 0.0, max: 100.0 },
        default: ParamDefault::Float(1.0),
        documentation: "Dead time after each detected peak",
    },
    ParamSpec {
        name: "min_spikes",
        kind: ParamKind::Int { min: 1, max: 1_000_000 },
        default: ParamDefault::Int(1),
        documentation: "Channels with fewer detections do not produce a unit",
    },
];

pub static THRESHOLD_DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    name: "threshold",
    display_name: "Threshold detector",
    documentation: "Per-channel amplitude threshold detection with a MAD noise estimate. One unit per active channel.",
    params: PARAMS,
    emits_spurious_duplicates: false,
    deterministic: true,
    probe: always_installed,
};

fn always_installed() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    Neg,
    Pos,
    Both,
}

impl Sign {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "neg" => Some(Self::Neg),
            "pos" => Some(Self::Pos),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    fn score(self, centered: f32) -> f32 {
        match self {
            Self::Neg => -centered,
            Self::Pos => centered,
            Self::Both => centered.abs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdSorter;

pub static THRESHOLD: ThresholdSorter = ThresholdSorter;

impl SorterAdapter for ThresholdSorter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        &THRESHOLD_DESCRIPTOR
    }

    fn run(&self, signal: &GroupSignal, ctx: &RunContext<'_>) -> Result<RawOutput, AdapterError> {
        let started = Instant::now();
        let config = ctx.config;

        let threshold = config
            .get_f64("detect_threshold")
            .ok_or_else(|| AdapterError::Rejected("detect_threshold missing".to_string()))?
            as f32;
        let sign = config
            .get_str("detect_sign")
            .and_then(Sign::from_str)
            .ok_or_else(|| AdapterError::Rejected("detect_sign missing".to_string()))?;
        let refractory_ms = config
            .get_f64("refractory_ms")
            .ok_or_else(|| AdapterError::Rejected("refractory_ms missing".to_string()))?;
        let min_spikes = config.get_i64("min_spikes").unwrap_or(1).max(1) as usize;

        let refractory = (refractory_ms * signal.sampling_rate / 1000.0).round() as usize;
        let num_samples = signal.num_samples();
        if num_samples > 0 && refractory >= num_samples {
            return Err(AdapterError::Rejected(format!(
                "refractory period of {} samples covers the whole recording ({} samples)",
                refractory, num_samples
            )));
        }

        let mut trains = Vec::new();
        for (pos, trace) in signal.traces.iter().enumerate() {
            ctx.check_deadline(started)?;

            let peaks = detect_peaks(trace, threshold, sign, refractory);
            log::debug!(
                "Group {} channel {}: {} peaks",
                signal.group,
                signal.channels[pos],
                peaks.len()
            );
            if peaks.len() >= min_spikes {
                trains.push((pos as i64, peaks));
            }
        }

        Ok(RawOutput::LabelTrains(trains))
    }
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Peak sample of every threshold crossing, honouring a dead time of
/// `refractory` samples after each peak.
fn detect_peaks(trace: &[f32], threshold: f32, sign: Sign, refractory: usize) -> Vec<i64> {
    let mut scratch = trace.to_vec();
    let center = median(&mut scratch);
    for v in scratch.iter_mut() {
        *v = (*v - center).abs();
    }
    let noise = median(&mut scratch) / MAD_SCALE;
    if noise <= f32::EPSILON {
        return Vec::new();
    }
    let level = threshold * noise;

    let mut peaks = Vec::new();
    let mut i = 0;
    while i < trace.len() {
        if sign.score(trace[i] - center) <= level {
            i += 1;
            continue;
        }
        let mut peak = i;
        let mut j = i;
        while j < trace.len() && sign.score(trace[j] - center) > level {
            if sign.score(trace[j] - center) > sign.score(trace[peak] - center) {
                peak = j;
            }
            j += 1;
        }
        peaks.push(peak as i64);
        i = j.max(peak + refractory + 1);
    }
    peaks
}
