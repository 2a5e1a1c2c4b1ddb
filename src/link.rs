//! Transport contract consumed by the connection.
//!
//! The physical USB-radio transport lives outside this crate. Anything that
//! can scan for peers, open a URI and move one packet at a time can carry a
//! connection: implement [LinkContext] and [LinkConnection] and hand them
//! to [Crazyflie::connect_from_uri](crate::Crazyflie::connect_from_uri).

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::warn;

use crate::crtp::{Packet, Port};
use crate::Result;

/// Factory for link connections, addressable by URI.
pub trait LinkContext {
    /// Scan for reachable devices and return their URIs.
    fn scan(&self) -> Result<Vec<String>>;

    /// Open a connection to the given URI.
    fn open_link(&self, uri: &str) -> Result<Box<dyn LinkConnection>>;
}

/// One open packet link.
///
/// Implementations are shared between the dispatcher thread and every
/// sender, so they must be both `Send` and `Sync`.
pub trait LinkConnection: Send + Sync {
    /// Queue one packet for transmission.
    fn send_packet(&self, packet: &Packet) -> Result<()>;

    /// Wait up to `timeout` for one inbound packet.
    fn recv_packet(&self, timeout: Duration) -> Result<Option<Packet>>;

    /// Close the link. Further transfers fail.
    fn close(&self);
}

/// Shared uplink handle serializing every producer onto the link.
///
/// Sending is best-effort: after the first transport error, or once the
/// connection is torn down, the link is marked dead, later sends become
/// no-ops and the subsystems report [Disconnected](crate::Error).
pub(crate) struct Uplink {
    link: Arc<dyn LinkConnection>,
    send_lock: Mutex<()>,
    link_ok: AtomicBool,
}

impl Uplink {
    pub fn new(link: Arc<dyn LinkConnection>) -> Self {
        Uplink {
            link,
            send_lock: Mutex::new(()),
            link_ok: AtomicBool::new(true),
        }
    }

    /// Build and send one packet. Oversized payloads and link failures are
    /// logged and dropped.
    pub fn send(&self, port: Port, channel: u8, payload: Vec<u8>) {
        if !self.link_ok.load(Relaxed) {
            return;
        }
        match Packet::new(port, channel, payload) {
            Ok(packet) => {
                let _guard = self.send_lock.lock().unwrap();
                if let Err(e) = self.link.send_packet(&packet) {
                    warn!("link send failed: {}", e);
                    self.link_ok.store(false, Relaxed);
                }
            }
            Err(e) => warn!("dropping malformed outbound packet: {}", e),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.link_ok.load(Relaxed)
    }

    pub fn mark_failed(&self) {
        self.link_ok.store(false, Relaxed);
    }
}
