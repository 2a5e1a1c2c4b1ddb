//! # Parameter subsystem
//!
//! The Crazyflie exposes named, typed scalars the host can read and
//! write. Their table of contents is downloaded at connection time (or
//! read back from the on-disk cache); parameters are then addressed as
//! "group.name".
//!
//! Callers never talk to the radio directly. A read or write marks the
//! parameter's cell and queues its identifier; a dedicated worker thread
//! drains the queues, one request in flight per parameter, and inbound
//! replies publish into the cell. Two queues exist on purpose: the
//! extended-attribute queue finishes the TOC enrichment (currently the
//! "persistent" flag) and is always served before ordinary reads and
//! writes. After the TOC completes, an "update all" pass reads every
//! parameter once so that `get` calls can be answered locally.

use std::collections::VecDeque;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicU8, AtomicUsize};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::crtp::{Packet, Port, NO_IDENT, NO_PROTOCOL};
use crate::link::Uplink;
use crate::packing;
use crate::toc::{Toc, TocCache};
use crate::toc_fetcher::{report_fetch_error, TocFetcher};
use crate::value::ParamValueKind;
use crate::{Error, Result};

const TOC_CHANNEL: u8 = 0;
const READ_CHANNEL: u8 = 1;
const WRITE_CHANNEL: u8 = 2;
const MISC_CHANNEL: u8 = 3;

const _MISC_SET_BY_NAME: u8 = 0;
const MISC_VALUE_UPDATED: u8 = 1;
const MISC_GET_EXTENDED_TYPE: u8 = 2;
const MISC_PERSISTENT_STORE: u8 = 3;
const _MISC_PERSISTENT_GET_STATE: u8 = 4;
const MISC_PERSISTENT_CLEAR: u8 = 5;
const _MISC_GET_DEFAULT_VALUE: u8 = 6;

const EXTENDED_PERSISTENT: u8 = 1;

// progress of a request, low byte of the cell state
const PENDING: u16 = 0;
const REQUESTED: u16 = 1;
const SET: u16 = 2;

// requested operation, high byte of the cell state
const REQUEST_NONE: u16 = 0 << 8;
const REQUEST_READ: u16 = 1 << 8;
const REQUEST_WRITE: u16 = 2 << 8;

// extended attribute resolution for the queue head
const EXTENDED_PENDING: u8 = 0;
const EXTENDED_REQUEST: u8 = 1;
const EXTENDED_SET: u8 = 2;

// progress of the post-TOC "update all" pass
const ALL_PARAMS_PENDING: u8 = 0;
const ALL_PARAMS_REQUESTED: u8 = 1;
const ALL_PARAMS_DONE: u8 = 2;

const WORKER_TICK: Duration = Duration::from_millis(1);

/// Per-element info of the parameter table of contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ParamItemInfo {
    pub ctype: ParamValueKind,
    pub readonly: bool,
    pub extended: bool,
}

impl TryFrom<u8> for ParamItemInfo {
    type Error = Error;

    fn try_from(type_byte: u8) -> Result<Self> {
        Ok(ParamItemInfo {
            ctype: ParamValueKind::try_from(type_byte & 0x0f)?,
            readonly: type_byte & 0x10 != 0,
            extended: type_byte & 0x20 != 0,
        })
    }
}

/// Thread-safe store for one parameter value.
///
/// The packed wire bytes live in a single 64-bit atomic; the state word
/// sequences the read/write handshake with the worker thread.
#[derive(Debug)]
struct ParamValue {
    value: AtomicU64,
    ctype: ParamValueKind,
    csize: u8,
    state: AtomicU16,
}

impl ParamValue {
    fn new(ctype: ParamValueKind, state: u16) -> ParamValue {
        ParamValue {
            value: AtomicU64::new(0),
            ctype,
            csize: ctype.size() as u8,
            state: AtomicU16::new(state),
        }
    }

    fn state(&self) -> u16 {
        self.state.load(Relaxed)
    }

    fn set_state(&self, state: u16) {
        self.state.store(state, Relaxed);
    }

    /// Current value widened to a `f64`, honoring the stored type.
    fn get_f64(&self) -> f64 {
        let raw = self.value.load(Relaxed);
        let bytes = raw.to_le_bytes();
        match self.ctype {
            ParamValueKind::I8 => bytes[0] as i8 as f64,
            ParamValueKind::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            ParamValueKind::I32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            ParamValueKind::I64 => raw as i64 as f64,
            ParamValueKind::U8 => bytes[0] as f64,
            ParamValueKind::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            ParamValueKind::U32 => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            ParamValueKind::U64 => raw as f64,
            ParamValueKind::F32 => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            ParamValueKind::F64 => f64::from_bits(raw),
            ParamValueKind::Fp16 => packing::unpack_f16_bytes([bytes[0], bytes[1]]) as f64,
            // FP8 has no host-side codec
            ParamValueKind::Fp8 => 0.0,
        }
    }

    fn set_i64(&self, value: i64) {
        let raw = match self.ctype {
            ParamValueKind::I8 => value as i8 as u8 as u64,
            ParamValueKind::I16 => u16::from_le_bytes((value as i16).to_le_bytes()) as u64,
            ParamValueKind::I32 => u32::from_le_bytes((value as i32).to_le_bytes()) as u64,
            ParamValueKind::I64 => value as u64,
            _ => {
                self.set_u64(value as u64);
                return;
            }
        };
        self.value.store(raw, Relaxed);
    }

    fn set_u64(&self, value: u64) {
        let raw = match self.ctype {
            ParamValueKind::U8 | ParamValueKind::I8 | ParamValueKind::Fp8 => value as u8 as u64,
            ParamValueKind::U16 | ParamValueKind::I16 => value as u16 as u64,
            ParamValueKind::U32 | ParamValueKind::I32 => value as u32 as u64,
            _ => value,
        };
        self.value.store(raw, Relaxed);
    }

    /// Store a `f64`, converting to the declared type. Floats written to
    /// integer cells truncate toward zero; integers written to float
    /// cells cast.
    fn set_f64(&self, value: f64) {
        if self.ctype.is_integer() {
            if self.ctype.is_signed() {
                self.set_i64(value as i64);
            } else {
                self.set_u64(value as u64);
            }
            return;
        }
        let raw = match self.ctype {
            ParamValueKind::F32 => (value as f32).to_bits() as u64,
            ParamValueKind::F64 => value.to_bits(),
            ParamValueKind::Fp16 => packing::pack_f16(value as f32) as u64,
            _ => 0,
        };
        self.value.store(raw, Relaxed);
    }

    /// The value as its wire bytes, `csize` of them.
    fn wire_bytes(&self) -> Vec<u8> {
        self.value.load(Relaxed).to_le_bytes()[..self.csize as usize].to_vec()
    }

    /// Publish bytes arriving from the device and settle the cell.
    fn set_from_wire(&self, data: &[u8]) {
        let size = self.csize as usize;
        if data.len() < size {
            warn!("short parameter value: {} of {} bytes", data.len(), size);
            return;
        }
        let mut raw = [0u8; 8];
        raw[..size].copy_from_slice(&data[..size]);
        self.value.store(u64::from_le_bytes(raw), Relaxed);
        self.set_state(SET | REQUEST_NONE);
    }
}

/// Pre-bound handle to one parameter.
///
/// Binding caches the identifier and type so that hot paths never search
/// the table of contents again.
#[derive(Debug, Clone)]
pub struct ParamSetting {
    /// The "group.name" this handle binds to.
    pub complete_name: String,
    /// Value shuttled by [Param::get_setting] / [Param::set_setting].
    pub value: f64,
    ident: u16,
    ctype: Option<ParamValueKind>,
    registered: bool,
}

impl ParamSetting {
    pub fn new(complete_name: &str) -> ParamSetting {
        ParamSetting {
            complete_name: complete_name.to_owned(),
            value: 0.0,
            ident: NO_IDENT,
            ctype: None,
            registered: false,
        }
    }

    /// True once [Param::register_param_setting] resolved the name.
    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

/// # Access to the parameter subsystem
///
/// Owns the parameter TOC, the per-parameter value cells and the worker
/// that drains the request queues.
pub struct Param {
    uplink: Arc<Uplink>,
    cache: TocCache,
    toc: Mutex<Toc<ParamItemInfo>>,
    fetcher: Mutex<TocFetcher>,
    values: Mutex<Vec<Option<Arc<ParamValue>>>>,
    persistent: Mutex<Vec<bool>>,
    update_queue: Mutex<VecDeque<u16>>,
    extended_queue: Mutex<VecDeque<u16>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    running: AtomicBool,
    protocol_version: AtomicU8,
    reset_complete: AtomicBool,
    extended_request_ident: AtomicU16,
    extended_state: AtomicU8,
    update_state: AtomicU8,
    id_count: AtomicUsize,
}

impl Param {
    pub(crate) fn new(uplink: Arc<Uplink>, cache: TocCache) -> Param {
        Param {
            uplink,
            cache,
            toc: Mutex::new(Toc::new()),
            fetcher: Mutex::new(TocFetcher::new(Port::Param, NO_PROTOCOL)),
            values: Mutex::new(Vec::new()),
            persistent: Mutex::new(Vec::new()),
            update_queue: Mutex::new(VecDeque::new()),
            extended_queue: Mutex::new(VecDeque::new()),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
            protocol_version: AtomicU8::new(NO_PROTOCOL),
            reset_complete: AtomicBool::new(false),
            extended_request_ident: AtomicU16::new(NO_IDENT),
            extended_state: AtomicU8::new(EXTENDED_PENDING),
            update_state: AtomicU8::new(ALL_PARAMS_PENDING),
            id_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn configure(&self, protocol_version: u8) {
        self.protocol_version.store(protocol_version, Relaxed);
    }

    fn use_v2(&self) -> bool {
        let version = self.protocol_version.load(Relaxed);
        version != NO_PROTOCOL && version >= 4
    }

    /// True once the TOC is complete and every extended attribute is
    /// resolved.
    pub fn reset_complete(&self) -> bool {
        self.reset_complete.load(Relaxed)
    }

    /// True once the post-TOC "update all" pass has read every value.
    pub fn all_updated(&self) -> bool {
        self.update_state.load(Relaxed) == ALL_PARAMS_DONE
    }

    /// Spawn the queue worker for this connection.
    pub(crate) fn start_worker(self: &Arc<Self>) {
        if self.running.swap(true, Relaxed) {
            return;
        }
        let param = self.clone();
        let handle = thread::Builder::new()
            .name("param-worker".to_owned())
            .spawn(move || {
                while param.running.load(Relaxed) {
                    if !param.service_extended_queue() {
                        param.service_update_queue();
                    }
                    thread::sleep(WORKER_TICK);
                }
            })
            .expect("spawning the parameter worker cannot fail");
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Stop the worker and drop all client-side parameter state.
    pub(crate) fn stop(&self) {
        self.running.store(false, Relaxed);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.values.lock().unwrap().clear();
        self.persistent.lock().unwrap().clear();
        self.update_queue.lock().unwrap().clear();
        self.extended_queue.lock().unwrap().clear();
        self.toc.lock().unwrap().clear();
        self.reset_complete.store(false, Relaxed);
        self.update_state.store(ALL_PARAMS_PENDING, Relaxed);
        self.extended_request_ident.store(NO_IDENT, Relaxed);
        self.extended_state.store(EXTENDED_PENDING, Relaxed);
    }

    /// Clear the TOC and start fetching it again.
    pub(crate) fn reset(&self) {
        info!("resetting the param subsystem");
        self.reset_complete.store(false, Relaxed);
        self.update_state.store(ALL_PARAMS_PENDING, Relaxed);
        self.toc.lock().unwrap().clear();
        let mut fetcher = self.fetcher.lock().unwrap();
        *fetcher = TocFetcher::new(Port::Param, self.protocol_version.load(Relaxed));
        fetcher.start(&self.uplink);
    }

    /// Queue a read of every parameter.
    pub(crate) fn update_all(&self) {
        if self.reset_complete() {
            for name in self.names() {
                if let Err(e) = self.request_param_update(&name) {
                    warn!("could not queue update of {}: {}", name, e);
                }
            }
        }
        self.update_state.store(ALL_PARAMS_REQUESTED, Relaxed);
        info!("requesting values for all params");
    }

    /// The "group.name" of every parameter the device exposes.
    pub fn names(&self) -> Vec<String> {
        self.toc.lock().unwrap().complete_names()
    }

    /// Type of a parameter.
    pub fn get_type(&self, name: &str) -> Result<ParamValueKind> {
        self.toc
            .lock()
            .unwrap()
            .get_element_by_complete_name(name)
            .map(|element| element.info.ctype)
            .ok_or_else(|| Error::VariableNotFound(name.to_owned()))
    }

    /// True unless the parameter is read-only.
    pub fn is_writable(&self, name: &str) -> Result<bool> {
        self.toc
            .lock()
            .unwrap()
            .get_element_by_complete_name(name)
            .map(|element| !element.info.readonly)
            .ok_or_else(|| Error::VariableNotFound(name.to_owned()))
    }

    /// True when the extended attributes marked the parameter as
    /// persistable to the device EEPROM.
    pub fn is_persistent(&self, name: &str) -> Result<bool> {
        let ident = self.lookup(name)?.0;
        Ok(self
            .persistent
            .lock()
            .unwrap()
            .get(ident as usize)
            .copied()
            .unwrap_or(false))
    }

    fn lookup(&self, name: &str) -> Result<(u16, ParamValueKind)> {
        self.toc
            .lock()
            .unwrap()
            .get_element_by_complete_name(name)
            .map(|element| (element.ident, element.info.ctype))
            .ok_or_else(|| Error::VariableNotFound(name.to_owned()))
    }

    fn check_connected(&self) -> Result<()> {
        if self.uplink.is_ok() {
            Ok(())
        } else {
            Err(Error::Disconnected)
        }
    }

    /// The locally cached value of a parameter.
    ///
    /// Values are populated by the "update all" pass at connection time
    /// and kept current by write acknowledgements and device-side update
    /// notifications. Returns [Error::Disconnected] once the connection
    /// is down.
    pub fn get_value(&self, name: &str) -> Result<f64> {
        self.check_connected()?;
        let (ident, _) = self.lookup(name)?;
        let values = self.values.lock().unwrap();
        values
            .get(ident as usize)
            .and_then(|cell| cell.as_ref())
            .map(|cell| cell.get_f64())
            .ok_or_else(|| Error::ParamError(format!("value of {} not read yet", name)))
    }

    /// Queue a write of a parameter. The call returns immediately; the
    /// worker sends the write and the acknowledgement settles the cell.
    pub fn set_value(&self, name: &str, value: f64) -> Result<()> {
        let (ident, ctype) = self.lookup(name)?;
        self.queue_write(ident, ctype, value)
    }

    fn queue_write(&self, ident: u16, ctype: ParamValueKind, value: f64) -> Result<()> {
        self.check_connected()?;
        {
            let mut values = self.values.lock().unwrap();
            let slot = values
                .get_mut(ident as usize)
                .ok_or_else(|| Error::ParamError(format!("identifier {} out of range", ident)))?;
            let cell = slot.get_or_insert_with(|| {
                Arc::new(ParamValue::new(ctype, PENDING | REQUEST_WRITE))
            });
            cell.set_f64(value);
            cell.set_state(PENDING | REQUEST_WRITE);
        }
        self.update_queue.lock().unwrap().push_back(ident);
        Ok(())
    }

    /// Queue a read of a parameter.
    pub fn request_param_update(&self, name: &str) -> Result<()> {
        self.check_connected()?;
        let (ident, ctype) = self.lookup(name)?;
        {
            let mut values = self.values.lock().unwrap();
            let slot = values
                .get_mut(ident as usize)
                .ok_or_else(|| Error::ParamError(format!("identifier {} out of range", ident)))?;
            let cell = slot
                .get_or_insert_with(|| Arc::new(ParamValue::new(ctype, PENDING | REQUEST_READ)));
            cell.set_state(PENDING | REQUEST_READ);
        }
        self.update_queue.lock().unwrap().push_back(ident);
        Ok(())
    }

    /// Bind a [ParamSetting] to its identifier and type.
    ///
    /// Returns the registration state; an unknown name leaves the handle
    /// unregistered. The current value, when already read, lands in
    /// `setting.value`.
    pub fn register_param_setting(&self, setting: &mut ParamSetting) -> bool {
        setting.ident = NO_IDENT;
        setting.ctype = None;
        setting.registered = false;
        if let Ok((ident, ctype)) = self.lookup(&setting.complete_name) {
            setting.ident = ident;
            setting.ctype = Some(ctype);
            setting.registered = true;
            self.get_setting(setting);
        }
        setting.registered
    }

    /// Read the cached value through a bound handle, avoiding any name
    /// search. Returns false when no value is available.
    pub fn get_setting(&self, setting: &mut ParamSetting) -> bool {
        if !setting.registered || setting.ident == NO_IDENT {
            return false;
        }
        let values = self.values.lock().unwrap();
        match values
            .get(setting.ident as usize)
            .and_then(|cell| cell.as_ref())
        {
            Some(cell) => {
                setting.value = cell.get_f64();
                true
            }
            None => false,
        }
    }

    /// Queue a write of `setting.value` through a bound handle.
    pub fn set_setting(&self, setting: &ParamSetting) -> Result<()> {
        let ctype = setting
            .ctype
            .filter(|_| setting.registered)
            .ok_or_else(|| {
                Error::ParamError(format!("{} is not registered", setting.complete_name))
            })?;
        self.queue_write(setting.ident, ctype, setting.value)
    }

    /// Ask the firmware to store the parameter's current value in EEPROM.
    pub fn persistent_store(&self, name: &str) -> Result<()> {
        self.check_connected()?;
        let (ident, _) = self.lookup(name)?;
        let mut payload = vec![MISC_PERSISTENT_STORE];
        payload.extend_from_slice(&ident.to_le_bytes());
        self.uplink.send(Port::Param, MISC_CHANNEL, payload);
        Ok(())
    }

    /// Ask the firmware to drop the parameter's stored EEPROM value.
    pub fn persistent_clear(&self, name: &str) -> Result<()> {
        self.check_connected()?;
        let (ident, _) = self.lookup(name)?;
        let mut payload = vec![MISC_PERSISTENT_CLEAR];
        payload.extend_from_slice(&ident.to_le_bytes());
        self.uplink.send(Port::Param, MISC_CHANNEL, payload);
        Ok(())
    }

    /// One pass over the extended-attribute queue. Returns true while the
    /// queue holds work, which starves the update queue by design.
    fn service_extended_queue(&self) -> bool {
        let mut queue = self.extended_queue.lock().unwrap();
        let Some(&head) = queue.front() else {
            return false;
        };

        if head == self.extended_request_ident.load(Relaxed) {
            if self.extended_state.load(Relaxed) == EXTENDED_SET {
                queue.pop_front();
                self.extended_state.store(EXTENDED_PENDING, Relaxed);
                self.extended_request_ident.store(NO_IDENT, Relaxed);
                if queue.is_empty() {
                    info!("extended param attributes resolved");
                    self.reset_complete.store(true, Relaxed);
                }
            }
        } else if self.extended_request_ident.load(Relaxed) == NO_IDENT {
            let mut payload = vec![MISC_GET_EXTENDED_TYPE];
            if self.use_v2() {
                payload.extend_from_slice(&head.to_le_bytes());
            } else {
                payload.push(head as u8);
            }
            self.uplink.send(Port::Param, MISC_CHANNEL, payload);
            self.extended_request_ident.store(head, Relaxed);
            self.extended_state.store(EXTENDED_REQUEST, Relaxed);
        }
        true
    }

    /// One pass over the read/write queue head.
    fn service_update_queue(&self) {
        let mut queue = self.update_queue.lock().unwrap();
        let Some(&head) = queue.front() else {
            return;
        };
        let cell = self
            .values
            .lock()
            .unwrap()
            .get(head as usize)
            .and_then(|slot| slot.clone());
        let Some(cell) = cell else {
            queue.pop_front();
            return;
        };

        let ident_bytes = |ident: u16| -> Vec<u8> {
            if self.use_v2() {
                ident.to_le_bytes().to_vec()
            } else {
                vec![ident as u8]
            }
        };

        match cell.state() {
            state if state == (PENDING | REQUEST_READ) => {
                self.uplink.send(Port::Param, READ_CHANNEL, ident_bytes(head));
                cell.set_state(REQUESTED | REQUEST_READ);
            }
            state if state == (PENDING | REQUEST_WRITE) => {
                let mut payload = ident_bytes(head);
                payload.extend_from_slice(&cell.wire_bytes());
                self.uplink.send(Port::Param, WRITE_CHANNEL, payload);
                cell.set_state(REQUESTED | REQUEST_WRITE);
            }
            state if state == (SET | REQUEST_NONE) => {
                queue.pop_front();
            }
            // a request is in flight; wait for its reply
            _ => {}
        }
    }

    pub(crate) fn handle_packet(&self, pk: &Packet) {
        match pk.channel() {
            TOC_CHANNEL => self.handle_toc_reply(pk),
            READ_CHANNEL | WRITE_CHANNEL | MISC_CHANNEL => self.param_updated(pk),
            _ => {}
        }
    }

    fn handle_toc_reply(&self, pk: &Packet) {
        let complete = {
            let mut toc = self.toc.lock().unwrap();
            let mut fetcher = self.fetcher.lock().unwrap();
            match fetcher.handle_packet(pk, &mut toc, &self.cache, &self.uplink) {
                Ok(complete) => complete,
                Err(e) => {
                    report_fetch_error(Port::Param, &e);
                    false
                }
            }
        };
        if complete {
            self.toc_complete();
        }
    }

    /// Size the value table and queue the deferred extended-attribute
    /// lookups. The subsystem is reset-complete once that queue drains.
    fn toc_complete(&self) {
        let (count, extended_ids) = {
            let toc = self.toc.lock().unwrap();
            let ids: Vec<u16> = toc
                .elements()
                .filter(|(_, element)| element.info.extended)
                .map(|(_, element)| element.ident)
                .collect();
            (toc.id_count(), ids)
        };

        self.id_count.store(count, Relaxed);
        self.values.lock().unwrap().resize_with(count, || None);
        *self.persistent.lock().unwrap() = vec![false; count];

        let mut queue = self.extended_queue.lock().unwrap();
        queue.extend(extended_ids.iter().copied());
        let done = queue.is_empty();
        drop(queue);

        info!(
            "param TOC ready: {} items, {} with extended attributes",
            count,
            extended_ids.len()
        );
        self.reset_complete.store(done, Relaxed);
    }

    /// Publish one READ/WRITE/MISC reply into the matching cell.
    fn param_updated(&self, pk: &Packet) {
        let channel = pk.channel();
        let data = pk.payload();
        let mut index = if channel == MISC_CHANNEL { 1 } else { 0 };

        if channel == MISC_CHANNEL {
            match data.first() {
                Some(&MISC_VALUE_UPDATED) | Some(&MISC_GET_EXTENDED_TYPE) => {}
                _ => return,
            }
        }

        let ident = if self.use_v2() {
            if data.len() < index + 2 {
                return;
            }
            let ident = u16::from_le_bytes([data[index], data[index + 1]]);
            index += 2;
            ident
        } else {
            if data.len() < index + 1 {
                return;
            }
            let ident = data[index] as u16;
            index += 1;
            ident
        };

        if channel == MISC_CHANNEL && data.first() == Some(&MISC_GET_EXTENDED_TYPE) {
            self.extended_reply(ident, data.get(index).copied());
            return;
        }

        let cell = self
            .values
            .lock()
            .unwrap()
            .get(ident as usize)
            .and_then(|slot| slot.clone());
        let Some(cell) = cell else {
            debug!("reply for unknown parameter id {}", ident);
            return;
        };

        match channel {
            MISC_CHANNEL => cell.set_from_wire(&data[index..]),
            READ_CHANNEL => {
                // a status byte precedes the value
                if data.len() <= index {
                    return;
                }
                cell.set_from_wire(&data[index + 1..]);
                if self.update_state.load(Relaxed) == ALL_PARAMS_REQUESTED
                    && ident as usize == self.id_count.load(Relaxed).saturating_sub(1)
                {
                    self.update_state.store(ALL_PARAMS_DONE, Relaxed);
                    info!("read values for all params");
                }
            }
            // write acknowledge: settle the cell without touching the value
            _ => cell.set_state(SET | REQUEST_NONE),
        }
    }

    fn extended_reply(&self, ident: u16, extended_type: Option<u8>) {
        if ident != self.extended_request_ident.load(Relaxed)
            || self.extended_state.load(Relaxed) != EXTENDED_REQUEST
        {
            return;
        }
        if extended_type == Some(EXTENDED_PERSISTENT) {
            if let Some(flag) = self.persistent.lock().unwrap().get_mut(ident as usize) {
                *flag = true;
            }
        }
        self.extended_state.store(EXTENDED_SET, Relaxed);
    }
}
