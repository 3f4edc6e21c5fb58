//! Scheduler configuration.

/// Default usable size of a coroutine stack.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Smallest stack that leaves room for the context switch frames and a panic unwind.
pub const MIN_STACK_SIZE: usize = 32 * 1024;

/// Default number of readiness events collected per wait.
pub const DEFAULT_MAX_EVENTS: usize = 64;

/// Configuration for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Usable stack size of every coroutine, rounded up to whole pages.
    pub stack_size: usize,
    /// Places an inaccessible page below each stack so overflows fault.
    pub guard_page: bool,
    /// Upper bound on the events returned by one wait on the readiness facility.
    pub max_events: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            guard_page: true,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

impl SchedulerConfig {
    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(format!(
                "stack_size must be at least {MIN_STACK_SIZE} bytes, got {}",
                self.stack_size
            ));
        }

        if self.max_events == 0 {
            return Err("max_events must be greater than 0".to_string());
        }

        if self.max_events > i32::MAX as usize {
            return Err("max_events must fit in a C int".to_string());
        }

        Ok(())
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_guard_page(mut self, guard_page: bool) -> Self {
        self.guard_page = guard_page;
        self
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
        assert!(config.guard_page);
    }

    #[test]
    fn test_invalid_configs() {
        let config = SchedulerConfig::default().with_stack_size(1024);
        assert!(config.validate().unwrap_err().contains("stack_size"));

        let config = SchedulerConfig::default().with_max_events(0);
        assert!(config.validate().is_err());
    }
}
