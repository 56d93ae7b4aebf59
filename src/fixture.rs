//! Explicit per-test context.
//!
//! A test receives everything it talks to through a [`TestContext`]: the
//! assertion library bound to its device prefix, the emulator back-door (if
//! the IOC runs against one) and the simulation mode. Nothing is looked up
//! from process-wide state.

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::channel_access::ChannelAccess;
use crate::value::PvValue;

/// Control of a device emulator that bypasses the IOC.
pub trait DeviceBackdoor: Send + Sync {
    /// Set an emulator property directly on the device.
    fn set_on_device(&self, property: &str, value: PvValue) -> anyhow::Result<()>;

    /// Run a named function on the device (e.g. `reset`).
    fn run_function(&self, name: &str) -> anyhow::Result<()>;
}

/// How the IOC under test is simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Record simulation: records are simulated inside the IOC, no emulator.
    RecSim,
    /// Device simulation: the IOC talks to a device emulator.
    DevSim,
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestMode::RecSim => f.write_str("recsim"),
            TestMode::DevSim => f.write_str("devsim"),
        }
    }
}

/// Everything a single test needs, passed in explicitly.
pub struct TestContext {
    channel_access: ChannelAccess,
    backdoor: Option<Arc<dyn DeviceBackdoor>>,
    mode: TestMode,
}

impl TestContext {
    /// Context without an emulator back-door.
    pub fn new(channel_access: ChannelAccess, mode: TestMode) -> Self {
        Self {
            channel_access,
            backdoor: None,
            mode,
        }
    }

    /// Attach the emulator back-door.
    pub fn with_backdoor(mut self, backdoor: Arc<dyn DeviceBackdoor>) -> Self {
        self.backdoor = Some(backdoor);
        self
    }

    /// The assertion library for this test's device.
    pub fn ca(&self) -> &ChannelAccess {
        &self.channel_access
    }

    /// The emulator back-door; an error in record simulation.
    pub fn backdoor(&self) -> anyhow::Result<&dyn DeviceBackdoor> {
        self.backdoor
            .as_deref()
            .ok_or_else(|| anyhow!("no device emulator attached in {} mode", self.mode))
    }

    /// Simulation mode of this run.
    pub fn mode(&self) -> TestMode {
        self.mode
    }

    /// True when records are simulated inside the IOC.
    pub fn uses_rec_sim(&self) -> bool {
        self.mode == TestMode::RecSim
    }

    /// Returns true (and logs why) when the calling test should be skipped
    /// because it needs a device emulator.
    pub fn skip_in_recsim(&self, reason: &str) -> bool {
        if self.uses_rec_sim() {
            info!(reason, "skipping in recsim");
            true
        } else {
            false
        }
    }
}
