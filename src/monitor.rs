//! Simulated secure monitor
//!
//! Stands in for the privileged protection call when replaying frames on a
//! host. Configured ids report failure so error handling can be exercised.

use std::collections::HashSet;

use dpu_core::SecureMonitor;
use tracing::debug;

use crate::config::ProtectionConfig;

pub struct SimulatedMonitor {
    failing: HashSet<u32>,
    failure_code: i32,
    /// Calls issued so far
    pub calls: u64,
    /// Calls that reported failure
    pub failures: u64,
}

impl SimulatedMonitor {
    pub fn new(config: &ProtectionConfig) -> Self {
        let failure_code = if config.failure_code == 0 {
            -1
        } else {
            config.failure_code
        };
        Self {
            failing: config.failing_ids.iter().copied().collect(),
            failure_code,
            calls: 0,
            failures: 0,
        }
    }
}

impl SecureMonitor for SimulatedMonitor {
    fn set_protection(&mut self, secure_id: u32, enable: bool) -> i32 {
        self.calls += 1;
        debug!("smc: protection id {} -> {}", secure_id, enable);
        if self.failing.contains(&secure_id) {
            self.failures += 1;
            self.failure_code
        } else {
            0
        }
    }
}
