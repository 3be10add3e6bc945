use std::time::{Duration, Instant};

/// Logs how long a scope took when it is dropped
pub struct ProfileScope {
    label: String,
    start: Instant,
}

impl ProfileScope {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        log::info!(
            "[PROFILE] {} - {:.3}ms",
            self.label,
            self.start.elapsed().as_secs_f64() * 1000.0
        );
    }
}

/// Time the rest of the enclosing block
#[macro_export]
macro_rules! profile_scope {
    ($label:expr) => {
        let _profile_scope = $crate::profiling::ProfileScope::new($label);
    };
}
