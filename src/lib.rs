//! Core library for ioc_assert.
//!
//! Polling assertions over EPICS process variables for IOC integration
//! tests. Every assertion re-reads its PV until the expected condition holds
//! or a timeout expires, so tests tolerate the time an IOC and its device
//! emulator take to settle. A failing assertion reports both what was
//! expected and the last value observed.
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ioc_assert::{ChannelAccess, EngineConfig, MockPvServer};
//!
//! let server = Arc::new(MockPvServer::new());
//! server.insert("TE:NDW1234:TEMP", 20.0);
//! let config = EngineConfig { prefix: "TE:NDW1234:".into(), ..Default::default() };
//! let ca = ChannelAccess::new(server, &config);
//! ca.assert_is_number("TEMP", 20.0, 0.1, Duration::from_secs(1))?;
//! ```

pub mod access;
pub mod alarm;
pub mod channel_access;
pub mod config;
pub mod error;
pub mod fixture;
pub mod logging;
pub mod mock;
pub mod monitor;
pub mod poller;
pub mod suite;
pub mod tolerance;
pub mod value;

pub use access::{MonitorEvent, PvAccess, SubscriptionId};
pub use alarm::AlarmSeverity;
pub use channel_access::{
    AssertOptions, ChannelAccess, PutOptions, SetpointOptions, SimulatedAlarm, Trend,
};
pub use config::EngineConfig;
pub use error::{AccessError, AssertError, AssertResult};
pub use fixture::{DeviceBackdoor, TestContext, TestMode};
pub use mock::MockPvServer;
pub use monitor::MonitorCapture;
pub use poller::{Failure, Outcome, Poller};
pub use suite::{DeviceSuite, Expectation, SuiteCase, SuiteReport};
pub use value::PvValue;
