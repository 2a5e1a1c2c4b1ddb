//! # Crazyflie client library
//!
//! Host-side client for Crazyflie-class quadcopters speaking the CRTP
//! packet protocol over a USB-radio link. The crate connects to a craft,
//! discovers its logging and parameter tables of contents (with an
//! on-disk cache keyed by the device-reported CRC), streams telemetry
//! into lock-free cells, reads and writes parameters through an async
//! worker, and packs both low-level rate setpoints and high-level
//! trajectory commands. Telemetry and control share the same link.
//!
//! The physical transport is injected: implement [LinkContext] and
//! [LinkConnection] for anything that can scan for peers and move one
//! packet at a time.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use crazyflie_client::{Crazyflie, TocCache, LogConfig, LogVariable, Result};
//! # fn fly(link_context: &dyn crazyflie_client::LinkContext) -> Result<()> {
//! let uris = Crazyflie::scan(link_context)?;
//! let cf = Crazyflie::connect_from_uri(link_context, &uris[0], TocCache::new("/tmp/cf"))?;
//! while !cf.is_ready() {
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//!
//! // subscribe to telemetry
//! let yaw = Arc::new(LogVariable::by_name("stateEstimate.yaw"));
//! let block = Arc::new(LogConfig::new("attitude", 20));
//! block.add_variable(&yaw);
//! cf.log.add_config(&block)?;
//!
//! // read and write parameters
//! let effect = cf.param.get_value("ring.effect")?;
//! cf.param.set_value("ring.effect", effect + 1.0)?;
//!
//! // fly
//! cf.platform.send_arming_request(true);
//! cf.high_level_commander.takeoff(0.5, 2.0, 0);
//! # Ok(())
//! # }
//! ```

mod crazyflie;
mod crtp;
mod dispatch;
mod error;
mod link;
pub mod packing;
mod toc;
mod toc_fetcher;
mod value;

pub mod subsystems;

#[cfg(test)]
mod testutil;

pub use crate::crazyflie::Crazyflie;
pub use crate::crtp::{Packet, Port, CRTP_MTU, MAX_PAYLOAD};
pub use crate::dispatch::PortOwner;
pub use crate::error::{Error, Result};
pub use crate::link::{LinkConnection, LinkContext};
pub use crate::subsystems::commander::Commander;
pub use crate::subsystems::high_level_commander::{
    HighLevelCommander, ALL_GROUPS, TRAJECTORY_TYPE_POLY4D, TRAJECTORY_TYPE_POLY4D_COMPRESSED,
};
pub use crate::subsystems::log::{BlockState, Log, LogConfig, LogVariable};
pub use crate::subsystems::param::{Param, ParamSetting};
pub use crate::subsystems::platform::Platform;
pub use crate::toc::TocCache;
pub use crate::value::{LogValueKind, ParamValueKind};
