//! Concrete backend adapters.

mod herdingspikes;
mod threshold;

pub use herdingspikes::{HerdingSpikesSorter, HERDINGSPIKES, HERDINGSPIKES_DESCRIPTOR};
pub use threshold::{ThresholdSorter, THRESHOLD, THRESHOLD_DESCRIPTOR};
