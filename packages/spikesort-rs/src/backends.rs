//! Backend descriptors and the static backend registry.

use std::path::PathBuf;

use crate::adapter::SorterAdapter;
use crate::error::{Result, SortError, ValidationError};
use crate::params::{ParamOverrides, ParamSpec, RunConfig};
use crate::sorters::{HERDINGSPIKES, THRESHOLD};

/// Static metadata of one sorting backend
#[derive(Debug, Clone, Copy)]
pub struct BackendDescriptor {
    /// Unique registry key
    pub name: &'static str,
    pub display_name: &'static str,
    pub documentation: &'static str,
    pub params: &'static [ParamSpec],
    /// Backend may report the same spike twice; exact duplicates are dropped
    pub emits_spurious_duplicates: bool,
    /// Identical input and configuration always give identical output
    pub deterministic: bool,
    /// Side-effect free installation check
    pub probe: fn() -> bool,
}

impl BackendDescriptor {
    pub fn is_installed(&self) -> bool {
        (self.probe)()
    }

    pub fn default_configuration(&self) -> RunConfig {
        RunConfig::defaults(self.params)
    }

    pub fn validate(&self, overrides: &ParamOverrides) -> std::result::Result<RunConfig, ValidationError> {
        RunConfig::validated(self.name, self.params, overrides)
    }

    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Every supported backend, keyed by `descriptor().name`
pub static BACKEND_REGISTRY: &[&dyn SorterAdapter] = &[&THRESHOLD, &HERDINGSPIKES];

pub fn backend_names() -> Vec<&'static str> {
    BACKEND_REGISTRY.iter().map(|a| a.descriptor().name).collect()
}

pub fn find_adapter(name: &str) -> Result<&'static dyn SorterAdapter> {
    BACKEND_REGISTRY
        .iter()
        .copied()
        .find(|a| a.descriptor().name == name)
        .ok_or_else(|| SortError::UnknownBackend(name.to_string()))
}

/// Names of backends whose probe currently succeeds
pub fn installed_backends() -> Vec<&'static str> {
    BACKEND_REGISTRY
        .iter()
        .filter(|a| a.is_installed())
        .map(|a| a.descriptor().name)
        .collect()
}

// =============================================================================
// INTERPRETER RESOLUTION
// =============================================================================

/// Environment variable for an explicit Python interpreter
pub const PYTHON_ENV_VAR: &str = "SPIKESORT_PYTHON";

/// Interpreter names tried on `PATH`, in order
pub const PYTHON_CANDIDATES: &[&str] = &["python3", "python"];

/// Directories searched before `PATH` (in priority order)
pub const DEFAULT_PYTHON_DIRS: &[&str] = &["~/.local/bin", "/opt/conda/bin", "/usr/local/bin"];

fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Find the Python interpreter used for Python-hosted backends.
///
/// Resolution order:
/// 1. Explicit path (if provided)
/// 2. `$SPIKESORT_PYTHON`
/// 3. Default directories
/// 4. `PATH`
pub fn find_python(explicit_path: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        let p = expand_path(path);
        return p.exists().then_some(p);
    }

    if let Ok(env_path) = std::env::var(PYTHON_ENV_VAR) {
        let p = expand_path(&env_path);
        if p.exists() {
            return Some(p);
        }
        log::warn!("{} points to missing interpreter {}", PYTHON_ENV_VAR, p.display());
    }

    for dir in DEFAULT_PYTHON_DIRS {
        for name in PYTHON_CANDIDATES {
            let p = expand_path(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| PYTHON_CANDIDATES.iter().map(move |name| dir.join(name)))
        .find(|p| p.exists())
}
