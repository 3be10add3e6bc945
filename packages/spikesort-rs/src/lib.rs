pub mod adapter;
pub mod backends;
pub mod conformance;
pub mod error;
pub mod mmap_utils;
pub mod normalize;
pub mod params;
pub mod parser;
pub mod profiling;
pub mod recording;
pub mod sorter;
pub mod sorters;
pub mod types;

pub use adapter::{AdapterError, RawOutput, RunContext, SorterAdapter};
pub use backends::{
    backend_names, find_adapter, find_python, installed_backends, BackendDescriptor,
    BACKEND_REGISTRY,
};
pub use error::{ConfigError, ExecutionCause, Result, SortError, ValidationError};
pub use params::{ParamOverrides, ParamSpec, ParamValue, RunConfig};
pub use recording::{read_ascii_recording, GroupSignal, InMemoryRecording, Recording};
pub use sorter::{run_sorter, ExecutionMode, SortOptions, SortState, SpikeSorter};
pub use types::*;
