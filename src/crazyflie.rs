//! The root connection object.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;

use crate::crtp::NO_PROTOCOL;
use crate::dispatch::{CrtpDispatch, DispatchCtx, NullOwner, PortOwner};
use crate::link::{LinkConnection, LinkContext, Uplink};
use crate::subsystems::commander::Commander;
use crate::subsystems::high_level_commander::HighLevelCommander;
use crate::subsystems::log::Log;
use crate::subsystems::param::Param;
use crate::subsystems::platform::Platform;
use crate::toc::TocCache;
use crate::{Error, Result};

/// Milliseconds the boot handshake may take before connect fails.
const BOOT_WINDOW_MS: u32 = 100;

/// # The Crazyflie
///
/// This struct is one-time use: creating it connects to a Crazyflie and
/// once disconnected, either on request or after a connection loss, the
/// object cannot be reconnected. A new one needs to be created to connect
/// again.
///
/// Connecting resolves the protocol version, then brings up the log and
/// parameter subsystems in the background: their tables of contents are
/// downloaded (or served from the cache), parameter extended attributes
/// are resolved and every parameter value is read once. Poll
/// [Crazyflie::is_ready] or pass a [PortOwner] to follow the milestones.
pub struct Crazyflie {
    /// Log subsystem access
    pub log: Arc<Log>,
    /// Parameter subsystem access
    pub param: Arc<Param>,
    /// Platform services
    pub platform: Arc<Platform>,
    /// Low-level setpoints
    pub commander: Commander,
    /// High-level trajectory commands
    pub high_level_commander: HighLevelCommander,
    dispatch: CrtpDispatch,
    uplink: Arc<Uplink>,
    link: Arc<dyn LinkConnection>,
    connected: AtomicBool,
}

impl Crazyflie {
    /// Scan for reachable devices and return their URIs.
    pub fn scan(link_context: &dyn LinkContext) -> Result<Vec<String>> {
        let uris = link_context.scan()?;
        if uris.is_empty() {
            info!("scan found no device");
        }
        Ok(uris)
    }

    /// Open a connection to the given URI.
    ///
    /// Fails when the link cannot be opened or when the device does not
    /// answer the version handshake within the boot window.
    pub fn connect_from_uri(
        link_context: &dyn LinkContext,
        uri: &str,
        cache: TocCache,
    ) -> Result<Crazyflie> {
        Self::connect_with_owner(link_context, uri, cache, Arc::new(NullOwner))
    }

    /// Like [Crazyflie::connect_from_uri], with an owner notified at the
    /// log-ready and param-ready milestones.
    pub fn connect_with_owner(
        link_context: &dyn LinkContext,
        uri: &str,
        cache: TocCache,
        owner: Arc<dyn PortOwner>,
    ) -> Result<Crazyflie> {
        info!("connecting {}", uri);
        let link: Arc<dyn LinkConnection> = Arc::from(link_context.open_link(uri)?);
        let uplink = Arc::new(Uplink::new(link.clone()));

        let log = Arc::new(Log::new(uplink.clone(), cache.clone()));
        let param = Arc::new(Param::new(uplink.clone(), cache));
        let platform = Arc::new(Platform::new(uplink.clone()));
        let commander = Commander::new(uplink.clone());
        let high_level_commander = HighLevelCommander::new(uplink.clone());

        let dispatch = CrtpDispatch::new(DispatchCtx {
            link: link.clone(),
            uplink: uplink.clone(),
            log: log.clone(),
            param: param.clone(),
            platform: platform.clone(),
            owner,
        });
        dispatch.start();

        platform.request_version();
        let mut iterations = BOOT_WINDOW_MS;
        while platform.raw_protocol_version() == NO_PROTOCOL && iterations > 0 {
            thread::sleep(Duration::from_millis(1));
            iterations -= 1;
        }
        if platform.raw_protocol_version() == NO_PROTOCOL {
            dispatch.stop();
            link.close();
            return Err(Error::ProtocolTimeout);
        }
        let version = platform.raw_protocol_version();
        info!("connected, protocol version {}", version);

        log.configure(version);
        param.configure(version);
        param.start_worker();
        log.reset();

        Ok(Crazyflie {
            log,
            param,
            platform,
            commander,
            high_level_commander,
            dispatch,
            uplink,
            link,
            connected: AtomicBool::new(true),
        })
    }

    /// End the connection: stop logging and the parameter worker, join
    /// the dispatcher and close the link. Safe to call more than once.
    pub fn disconnect(&self) {
        if !self.connected.swap(false, Relaxed) {
            return;
        }
        info!("disconnecting");
        self.log.stop();
        self.param.stop();
        // give the final stop requests a moment on the link
        thread::sleep(Duration::from_millis(2));
        // later subsystem calls return Disconnected
        self.uplink.mark_failed();
        self.dispatch.stop();
        self.link.close();
    }

    /// True while the connection is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Relaxed) && self.uplink.is_ok()
    }

    /// True once every parameter value has been read and the connection
    /// is fully usable.
    pub fn is_ready(&self) -> bool {
        self.param.all_updated()
    }

    /// Inbound packets per second, averaged over the last second.
    pub fn packets_per_second(&self) -> f64 {
        self.dispatch.packets_per_second()
    }

    /// True while the link sees almost no inbound traffic. Informational;
    /// the link keeps trying and the flag clears when traffic resumes.
    pub fn timed_out(&self) -> bool {
        self.dispatch.timed_out()
    }
}

impl Drop for Crazyflie {
    fn drop(&mut self) {
        self.disconnect();
    }
}
