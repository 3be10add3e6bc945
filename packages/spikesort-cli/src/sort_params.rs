use crate::cli::{self, ParamArgs, RunArgs};
use crate::exit_codes;
use spikesort_rs::params::{overrides_from_json, ParamKind};
use spikesort_rs::{
    backend_names, find_adapter, read_ascii_recording, ExecutionMode, InMemoryRecording,
    ParamOverrides, SortError, SortOptions, SorterAdapter,
};
use std::path::{Path, PathBuf};

pub fn resolve_backend(name: &str) -> Result<&'static dyn SorterAdapter, String> {
    find_adapter(name).map_err(|_| {
        format!(
            "Unknown backend '{}'. Valid backends: {}",
            name,
            backend_names().join(", ")
        )
    })
}

/// Merge the `--config` file and `--param` flags; flags win.
pub fn load_overrides(args: &ParamArgs) -> Result<ParamOverrides, String> {
    let mut overrides = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read config file '{}': {}", path, e))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| format!("Config file '{}' is not valid JSON: {}", path, e))?;
            overrides_from_json(&value).map_err(|e| format!("Config file '{}': {}", path, e))?
        }
        None => ParamOverrides::new(),
    };

    for raw in &args.params {
        let (key, value) = cli::parse_param(raw)?;
        let mut object = serde_json::Map::new();
        object.insert(key.clone(), value);
        let single = overrides_from_json(&serde_json::Value::Object(object))
            .map_err(|e| format!("Parameter '{}': {}", key, e))?;
        overrides.extend(single);
    }
    Ok(overrides)
}

pub fn build_options(args: &RunArgs) -> SortOptions {
    SortOptions {
        mode: if args.parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        },
        timeout_secs: args.timeout,
        output_folder: args.output_folder.as_ref().map(PathBuf::from),
        keep_output: args.keep_output,
    }
}

/// Validate a recording path: existence and a text extension.
pub fn validate_file(file_path: &str) -> Result<(), String> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("Recording file not found: {}", file_path));
    }

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if !matches!(ext, "txt" | "csv" | "ascii" | "dat") {
        return Err(format!(
            "Unsupported file extension '{}'. Supported: txt, csv, ascii, dat",
            ext
        ));
    }
    Ok(())
}

pub fn load_recording(
    file_path: &str,
    sampling_rate: f64,
    groups: Option<&[u32]>,
) -> Result<InMemoryRecording, String> {
    let recording =
        read_ascii_recording(Path::new(file_path), sampling_rate).map_err(|e| e.to_string())?;
    match groups {
        Some(labels) => recording.with_group_labels(labels).map_err(|e| e.to_string()),
        None => Ok(recording),
    }
}

pub fn exit_code_for(err: &SortError) -> i32 {
    match err {
        SortError::BackendNotInstalled(_) => exit_codes::BACKEND_NOT_INSTALLED,
        SortError::UnknownBackend(_)
        | SortError::Configuration(_)
        | SortError::InvalidRecording(_) => exit_codes::INPUT_ERROR,
        _ => exit_codes::EXECUTION_ERROR,
    }
}

pub fn kind_label(kind: &ParamKind) -> String {
    match kind {
        ParamKind::Bool => "bool".to_string(),
        ParamKind::Int { min, max } => format!("int [{}, {}]", min, max),
        ParamKind::Float { min, max } => format!("float [{}, {}]", min, max),
        ParamKind::Choice(choices) => format!("one of {}", choices.join("|")),
        ParamKind::IntList => "int list".to_string(),
        ParamKind::OptionalInt { min, max } => format!("int [{}, {}] or null", min, max),
    }
}
