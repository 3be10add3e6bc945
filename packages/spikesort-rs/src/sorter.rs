use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapter::{AdapterError, RawOutput, RunContext, SorterAdapter};
use crate::backends::{find_adapter, BackendDescriptor};
use crate::error::{ConfigError, ExecutionCause, Result, SortError};
use crate::normalize::normalize;
use crate::params::{ParamOverrides, RunConfig};
use crate::profiling::ProfileScope;
use crate::recording::{validate_partition, Recording};
use crate::types::{GroupEntry, GroupId, SortingResult, UnitId};

/// How channel groups are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One group after another, in declared order
    #[default]
    Sequential,
    /// Groups run concurrently on the rayon pool
    Parallel,
}

/// Framework-level options, independent of the backend's own parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortOptions {
    pub mode: ExecutionMode,
    /// Limit per adapter invocation
    pub timeout_secs: Option<f64>,
    /// Parent of the run's working directory; the system temp dir when unset
    pub output_folder: Option<PathBuf>,
    /// Keep backend artefacts after the run
    pub keep_output: bool,
}

impl SortOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Progress of one `sort` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortState {
    NotStarted,
    Validating,
    Running { group_index: usize },
    Normalizing,
    Complete,
    Failed,
}

/// Scratch directory of one run, removed on drop unless kept
struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    fn create(parent: &Path, backend: &str, run_id: &str, keep: bool) -> Result<Self> {
        let path = parent.join(format!("spikesort_{}_{}", backend, run_id));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, keep })
    }

    fn group_dir(&self, group: &GroupId) -> Result<PathBuf> {
        let name: String = group
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let dir = self.path.join(format!("group_{}", name));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            log::info!("Backend output kept in {}", self.path.display());
        } else if let Err(e) = std::fs::remove_dir_all(&self.path) {
            log::warn!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

/// Runs one backend over every channel group of a recording and merges the
/// normalized per-group units into a single [`SortingResult`].
pub struct SpikeSorter<'a> {
    adapter: &'a dyn SorterAdapter,
    options: SortOptions,
}

impl SpikeSorter<'static> {
    /// Sorter for a registered backend
    pub fn from_registry(name: &str) -> Result<Self> {
        Ok(Self::new(find_adapter(name)?))
    }
}

impl<'a> SpikeSorter<'a> {
    pub fn new(adapter: &'a dyn SorterAdapter) -> Self {
        Self {
            adapter,
            options: SortOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SortOptions) -> Self {
        self.options = options;
        self
    }

    pub fn descriptor(&self) -> &'static BackendDescriptor {
        self.adapter.descriptor()
    }

    pub fn installed(&self) -> bool {
        self.adapter.is_installed()
    }

    pub fn options(&self) -> &SortOptions {
        &self.options
    }

    /// Sort `recording` with `overrides` applied on top of the backend defaults.
    ///
    /// Fails before reading any signal if the backend is missing, the
    /// parameters do not validate or the channel groups are not a partition.
    /// A failure in any group fails the whole call.
    pub fn sort(
        &self,
        recording: &dyn Recording,
        overrides: &ParamOverrides,
    ) -> Result<SortingResult> {
        let mut state = SortState::NotStarted;
        let outcome = self.sort_inner(recording, overrides, &mut state);
        if let Err(ref e) = outcome {
            log::error!(
                "Sorting with '{}' failed in state {:?}: {}",
                self.descriptor().name,
                state,
                e
            );
        }
        outcome
    }

    fn sort_inner(
        &self,
        recording: &dyn Recording,
        overrides: &ParamOverrides,
        state: &mut SortState,
    ) -> Result<SortingResult> {
        let descriptor = self.descriptor();
        let backend = descriptor.name;

        if !self.adapter.is_installed() {
            *state = SortState::Failed;
            return Err(SortError::BackendNotInstalled(backend.to_string()));
        }

        *state = SortState::Validating;
        let config = match descriptor.validate(overrides) {
            Ok(config) => config,
            Err(e) => {
                *state = SortState::Failed;
                return Err(ConfigError::Validation(e).into());
            }
        };
        if let Err(e) = validate_partition(recording) {
            *state = SortState::Failed;
            return Err(e);
        }

        let groups = recording.channel_groups();
        let (_, max_sample_index) = recording.sample_range();
        let run_id = Uuid::new_v4().to_string();

        log::info!("Starting sort {} with backend '{}'", run_id, backend);
        log::info!("Channel groups: {:?}", groups);
        log::info!("Mode: {:?}, timeout: {:?}", self.options.mode, self.options.timeout());
        log::debug!("Parameters: {:?}", config);

        let parent = self
            .options
            .output_folder
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let work = WorkDir::create(&parent, backend, &run_id, self.options.keep_output)?;

        let mut offset: UnitId = 0;
        let mut units = Vec::new();
        let mut anomalies = Vec::new();
        let mut entries = Vec::with_capacity(groups.len());

        let mut merge = |group: &GroupId, raw: RawOutput| -> Result<()> {
            let normalized = normalize(raw, descriptor, group, offset, max_sample_index)?;
            let count = UnitId::try_from(normalized.units.len())
                .ok()
                .and_then(|n| offset.checked_add(n))
                .ok_or_else(|| SortError::Normalization {
                    backend: backend.to_string(),
                    group: group.clone(),
                    reason: "unit id space exhausted".to_string(),
                })?;
            entries.push(GroupEntry {
                group: group.clone(),
                channels: recording.channels_in(group),
                unit_ids: normalized.units.iter().map(|u| u.id).collect(),
            });
            log::info!(
                "Group {}: {} units (ids {}..{})",
                group,
                normalized.units.len(),
                offset,
                count
            );
            offset = count;
            units.extend(normalized.units);
            anomalies.extend(normalized.anomalies);
            Ok(())
        };

        match self.options.mode {
            ExecutionMode::Sequential => {
                for (i, group) in groups.iter().enumerate() {
                    *state = SortState::Running { group_index: i };
                    let raw = self.run_group(recording, group, &config, &work)?;
                    *state = SortState::Normalizing;
                    merge(group, raw)?;
                }
            }
            ExecutionMode::Parallel => {
                *state = SortState::Running { group_index: 0 };
                let raws = groups
                    .par_iter()
                    .map(|group| self.run_group(recording, group, &config, &work))
                    .collect::<Result<Vec<_>>>()?;
                *state = SortState::Normalizing;
                for (group, raw) in groups.iter().zip(raws) {
                    merge(group, raw)?;
                }
            }
        }

        *state = SortState::Complete;
        let result = SortingResult::new(
            run_id,
            backend.to_string(),
            recording.info(),
            units,
            entries,
            anomalies,
        );
        log::info!(
            "Sort {} complete: {} units in {} groups",
            result.id(),
            result.num_units(),
            result.groups().len()
        );
        Ok(result)
    }

    fn run_group(
        &self,
        recording: &dyn Recording,
        group: &GroupId,
        config: &RunConfig,
        work: &WorkDir,
    ) -> Result<RawOutput> {
        let backend = self.descriptor().name;
        let profile = ProfileScope::new(format!("{} group {}", backend, group));

        let signal = recording.signal_for(group)?;
        let work_dir = work.group_dir(group)?;
        let timeout = self.options.timeout();
        let ctx = RunContext {
            config,
            timeout,
            work_dir: &work_dir,
        };

        let started = Instant::now();
        let raw = self
            .adapter
            .run(&signal, &ctx)
            .map_err(|e| self.contextualize(e, group))?;

        if let Some(limit) = timeout {
            if started.elapsed() > limit {
                return Err(self.contextualize(ExecutionCause::Timeout(limit).into(), group));
            }
        }

        log::debug!(
            "Group {} produced {} raw events in {:?}",
            group,
            raw.num_events(),
            profile.elapsed()
        );
        Ok(raw)
    }

    fn contextualize(&self, err: AdapterError, group: &GroupId) -> SortError {
        let backend = self.descriptor().name.to_string();
        match err {
            AdapterError::Execution(cause) => SortError::BackendExecution {
                backend,
                group: group.clone(),
                cause,
            },
            AdapterError::Rejected(reason) => ConfigError::Rejected { backend, reason }.into(),
        }
    }
}

/// Sort `recording` with the registered backend `name`.
pub fn run_sorter(
    name: &str,
    recording: &dyn Recording,
    overrides: &ParamOverrides,
    options: SortOptions,
) -> Result<SortingResult> {
    SpikeSorter::from_registry(name)?
        .with_options(options)
        .sort(recording, overrides)
}
