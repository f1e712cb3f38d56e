//! Configuration validation

use super::Config;
use crate::{Error, Result};

impl Config {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<()> {
        let prefix = &self.tasks.thread_name_prefix;
        if prefix.trim().is_empty() {
            return Err(Error::invalid_config("thread_name_prefix cannot be empty"));
        }
        if prefix.contains('\0') {
            return Err(Error::invalid_config(
                "thread_name_prefix cannot contain NUL bytes",
            ));
        }

        // Validate tick_interval_ms range [1-1000]
        if !(1..=1000).contains(&self.host_loop.tick_interval_ms) {
            return Err(Error::invalid_config("tick_interval_ms must be 1-1000"));
        }

        // Validate max_idle_ticks range [1-1000000]
        if !(1..=1_000_000).contains(&self.host_loop.max_idle_ticks) {
            return Err(Error::invalid_config("max_idle_ticks must be 1-1000000"));
        }

        // Validate max_batch range [1-65536]
        if !(1..=65_536).contains(&self.dispatcher.max_batch) {
            return Err(Error::invalid_config("max_batch must be 1-65536"));
        }

        Ok(())
    }
}
