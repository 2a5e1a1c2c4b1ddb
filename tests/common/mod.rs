//! In-process fake firmware for the integration tests.
//!
//! Implements the link traits and answers the protocol the way a real
//! craft would: version handshake, TOC downloads for log and param,
//! log block settings, parameter reads/writes and extended attributes.
//! Replies are generated synchronously when the host sends.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crazyflie_client::{LinkConnection, LinkContext, Packet, Port, Result};

pub struct VarDef {
    pub group: &'static str,
    pub name: &'static str,
    pub type_byte: u8,
}

pub struct ParamDef {
    pub group: &'static str,
    pub name: &'static str,
    pub type_byte: u8,
    pub value: Vec<u8>,
    pub persistent: bool,
}

pub struct FakeFirmware {
    version: u8,
    log_vars: Vec<VarDef>,
    log_crc: u32,
    params: Mutex<Vec<ParamDef>>,
    param_crc: u32,
    inbound: Mutex<VecDeque<Packet>>,
    pub log_element_requests: AtomicUsize,
    pub param_element_requests: AtomicUsize,
    pub closed: AtomicBool,
}

impl FakeFirmware {
    pub fn new(
        version: u8,
        log_vars: Vec<VarDef>,
        log_crc: u32,
        params: Vec<ParamDef>,
        param_crc: u32,
    ) -> Arc<FakeFirmware> {
        Arc::new(FakeFirmware {
            version,
            log_vars,
            log_crc,
            params: Mutex::new(params),
            param_crc,
            inbound: Mutex::new(VecDeque::new()),
            log_element_requests: AtomicUsize::new(0),
            param_element_requests: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn use_v2(&self) -> bool {
        self.version >= 4
    }

    fn push(&self, port: Port, channel: u8, payload: Vec<u8>) {
        let packet = Packet::new(port, channel, payload).unwrap();
        self.inbound.lock().unwrap().push_back(packet);
    }

    /// Stream one log data packet to the host.
    pub fn emit_log_data(&self, block_id: u8, timestamp: u32, data: &[u8]) {
        let mut payload = vec![block_id];
        payload.extend_from_slice(&timestamp.to_le_bytes()[..3]);
        payload.extend_from_slice(data);
        self.push(Port::Logging, 2, payload);
    }

    /// Push a device-side parameter change notification.
    pub fn notify_param_changed(&self, ident: u16, value: &[u8]) {
        let mut payload = vec![1];
        if self.use_v2() {
            payload.extend_from_slice(&ident.to_le_bytes());
        } else {
            payload.push(ident as u8);
        }
        payload.extend_from_slice(value);
        self.push(Port::Param, 3, payload);
    }

    pub fn param_value(&self, index: usize) -> Vec<u8> {
        self.params.lock().unwrap()[index].value.clone()
    }

    fn ident_from(&self, data: &[u8], at: usize) -> (u16, usize) {
        if self.use_v2() {
            (u16::from_le_bytes([data[at], data[at + 1]]), at + 2)
        } else {
            (data[at] as u16, at + 1)
        }
    }

    fn ident_bytes(&self, ident: u16) -> Vec<u8> {
        if self.use_v2() {
            ident.to_le_bytes().to_vec()
        } else {
            vec![ident as u8]
        }
    }

    fn handle(&self, pk: &Packet) {
        let data = pk.payload().to_vec();
        if data.is_empty() {
            return;
        }
        match (pk.port(), pk.channel()) {
            (Port::LinkCtrl, 1) => {
                let mut payload = b"Bitcraze Crazyflie".to_vec();
                payload.push(0);
                self.push(Port::LinkCtrl, 1, payload);
            }
            (Port::Platform, 1) => match data[0] {
                0 => self.push(Port::Platform, 1, vec![0, self.version]),
                1 => {
                    let mut payload = vec![1];
                    payload.extend_from_slice(b"2024.10");
                    self.push(Port::Platform, 1, payload);
                }
                _ => {}
            },
            (Port::Logging, 0) => self.handle_log_toc(&data),
            (Port::Logging, 1) => self.handle_log_settings(&data),
            (Port::Param, 0) => self.handle_param_toc(&data),
            (Port::Param, 1) => {
                let (ident, _) = self.ident_from(&data, 0);
                let mut payload = self.ident_bytes(ident);
                payload.push(0);
                payload.extend_from_slice(&self.param_value(ident as usize));
                self.push(Port::Param, 1, payload);
            }
            (Port::Param, 2) => {
                let (ident, at) = self.ident_from(&data, 0);
                let new_value = data[at..].to_vec();
                self.params.lock().unwrap()[ident as usize].value = new_value.clone();
                let mut payload = self.ident_bytes(ident);
                payload.extend_from_slice(&new_value);
                self.push(Port::Param, 2, payload);
            }
            (Port::Param, 3) => {
                if data[0] == 2 {
                    let (ident, _) = self.ident_from(&data, 1);
                    let persistent = self.params.lock().unwrap()[ident as usize].persistent;
                    let mut payload = vec![2];
                    payload.extend_from_slice(&self.ident_bytes(ident));
                    payload.push(u8::from(persistent));
                    self.push(Port::Param, 3, payload);
                }
            }
            _ => {}
        }
    }

    fn handle_log_settings(&self, data: &[u8]) {
        let id = data.get(1).copied().unwrap_or(0);
        match data[0] {
            // reset, create, append, start, stop, delete are all acknowledged
            cmd @ (0..=7) => self.push(Port::Logging, 1, vec![cmd, id, 0]),
            _ => {}
        }
    }

    fn handle_log_toc(&self, data: &[u8]) {
        match (self.use_v2(), data[0]) {
            (true, 3) => {
                let mut payload = vec![3];
                payload.extend_from_slice(&(self.log_vars.len() as u16).to_le_bytes());
                payload.extend_from_slice(&self.log_crc.to_le_bytes());
                self.push(Port::Logging, 0, payload);
            }
            (true, 2) => {
                self.log_element_requests.fetch_add(1, Relaxed);
                let ident = u16::from_le_bytes([data[1], data[2]]);
                let def = &self.log_vars[ident as usize];
                let mut payload = vec![2];
                payload.extend_from_slice(&ident.to_le_bytes());
                payload.push(def.type_byte);
                payload.extend_from_slice(def.group.as_bytes());
                payload.push(0);
                payload.extend_from_slice(def.name.as_bytes());
                payload.push(0);
                self.push(Port::Logging, 0, payload);
            }
            (false, 1) => {
                let mut payload = vec![1, self.log_vars.len() as u8];
                payload.extend_from_slice(&self.log_crc.to_le_bytes());
                self.push(Port::Logging, 0, payload);
            }
            (false, 0) => {
                self.log_element_requests.fetch_add(1, Relaxed);
                let ident = data[1];
                let def = &self.log_vars[ident as usize];
                let mut payload = vec![0, ident, def.type_byte];
                payload.extend_from_slice(def.group.as_bytes());
                payload.push(0);
                payload.extend_from_slice(def.name.as_bytes());
                payload.push(0);
                self.push(Port::Logging, 0, payload);
            }
            _ => {}
        }
    }

    fn handle_param_toc(&self, data: &[u8]) {
        let params = self.params.lock().unwrap();
        match (self.use_v2(), data[0]) {
            (true, 3) => {
                let mut payload = vec![3];
                payload.extend_from_slice(&(params.len() as u16).to_le_bytes());
                payload.extend_from_slice(&self.param_crc.to_le_bytes());
                self.push(Port::Param, 0, payload);
            }
            (true, 2) => {
                self.param_element_requests.fetch_add(1, Relaxed);
                let ident = u16::from_le_bytes([data[1], data[2]]);
                let def = &params[ident as usize];
                let mut payload = vec![2];
                payload.extend_from_slice(&ident.to_le_bytes());
                payload.push(def.type_byte);
                payload.extend_from_slice(def.group.as_bytes());
                payload.push(0);
                payload.extend_from_slice(def.name.as_bytes());
                payload.push(0);
                self.push(Port::Param, 0, payload);
            }
            (false, 1) => {
                let mut payload = vec![1, params.len() as u8];
                payload.extend_from_slice(&self.param_crc.to_le_bytes());
                self.push(Port::Param, 0, payload);
            }
            (false, 0) => {
                self.param_element_requests.fetch_add(1, Relaxed);
                let ident = data[1];
                let def = &params[ident as usize];
                let mut payload = vec![0, ident, def.type_byte];
                payload.extend_from_slice(def.group.as_bytes());
                payload.push(0);
                payload.extend_from_slice(def.name.as_bytes());
                payload.push(0);
                self.push(Port::Param, 0, payload);
            }
            _ => {}
        }
    }
}

pub struct FakeLink(pub Arc<FakeFirmware>);

impl LinkConnection for FakeLink {
    fn send_packet(&self, packet: &Packet) -> Result<()> {
        self.0.handle(packet);
        Ok(())
    }

    fn recv_packet(&self, timeout: Duration) -> Result<Option<Packet>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(packet) = self.0.inbound.lock().unwrap().pop_front() {
                return Ok(Some(packet));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    fn close(&self) {
        self.0.closed.store(true, Relaxed);
    }
}

pub struct FakeContext(pub Arc<FakeFirmware>);

impl LinkContext for FakeContext {
    fn scan(&self) -> Result<Vec<String>> {
        Ok(vec!["radio://0/80/2M/E7E7E7E7E7".to_owned()])
    }

    fn open_link(&self, _uri: &str) -> Result<Box<dyn LinkConnection>> {
        Ok(Box::new(FakeLink(self.0.clone())))
    }
}

/// The standard device most tests connect to.
pub fn standard_firmware(version: u8) -> Arc<FakeFirmware> {
    FakeFirmware::new(
        version,
        vec![
            VarDef {
                group: "stateEstimate",
                name: "x",
                type_byte: 7,
            },
            VarDef {
                group: "stateEstimate",
                name: "yaw",
                type_byte: 7,
            },
            VarDef {
                group: "pm",
                name: "vbat",
                type_byte: 0,
            },
        ],
        0x1111_2222,
        vec![
            ParamDef {
                group: "ring",
                name: "effect",
                type_byte: 0x08,
                value: vec![7],
                persistent: false,
            },
            ParamDef {
                group: "pid",
                name: "kp",
                type_byte: 0x06,
                value: 3.5f32.to_le_bytes().to_vec(),
                persistent: false,
            },
            ParamDef {
                group: "sound",
                name: "freq",
                type_byte: 0x29,
                value: 440u16.to_le_bytes().to_vec(),
                persistent: true,
            },
            ParamDef {
                group: "fw",
                name: "rev",
                type_byte: 0x1a,
                value: 99u32.to_le_bytes().to_vec(),
                persistent: false,
            },
        ],
        0x3333_4444,
    )
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
