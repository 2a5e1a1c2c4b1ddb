//! Helpers shared by the unit tests: an in-memory link that records every
//! outbound packet and replays scripted inbound ones.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::crtp::Packet;
use crate::link::{LinkConnection, Uplink};
use crate::Result;

pub(crate) struct RecordingLink {
    sent: Mutex<Vec<Packet>>,
    inbound: Mutex<VecDeque<Packet>>,
}

impl RecordingLink {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingLink {
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(VecDeque::new()),
        })
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    #[allow(dead_code)]
    pub fn push_inbound(&self, packet: Packet) {
        self.inbound.lock().unwrap().push_back(packet);
    }

    pub fn uplink(self: &Arc<Self>) -> Uplink {
        Uplink::new(self.clone())
    }
}

impl LinkConnection for RecordingLink {
    fn send_packet(&self, packet: &Packet) -> Result<()> {
        self.sent.lock().unwrap().push(packet.clone());
        Ok(())
    }

    fn recv_packet(&self, _timeout: Duration) -> Result<Option<Packet>> {
        Ok(self.inbound.lock().unwrap().pop_front())
    }

    fn close(&self) {}
}
