//! # Log subsystem
//!
//! The Crazyflie streams telemetry through host-declared *log blocks*: a
//! named, fixed-layout tuple of typed variables the firmware samples at a
//! programmed period. At connection time the table of contents of the
//! available variables is fetched (or read back from the on-disk cache)
//! and blocks can then reference variables by their "group.name" or by a
//! raw memory address.
//!
//! The host owns the [LogVariable] handles; the engine keeps shared
//! references for the life of the subscription and publishes every sample
//! into the variable's lock-free cell together with the device timestamp.
//! A poll-driven UI reads the cells with [LogVariable::fetch_float] at its
//! own pace, without ever blocking the radio.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::crtp::{Packet, Port, NO_PROTOCOL};
use crate::link::Uplink;
use crate::toc::{Toc, TocCache};
use crate::toc_fetcher::{report_fetch_error, TocFetcher};
use crate::value::LogValueKind;
use crate::{Error, Result};

/// Most log blocks the firmware can hold.
pub const MAX_BLOCKS: usize = 16;
/// Most variables across every live block.
pub const MAX_VARIABLES: usize = 128;
/// Largest data payload of one block.
pub const MAX_BLOCK_PAYLOAD: usize = 26;

const CHAN_TOC: u8 = 0;
const CHAN_SETTINGS: u8 = 1;
const CHAN_LOGDATA: u8 = 2;

const CMD_CREATE_BLOCK: u8 = 0;
const CMD_APPEND_BLOCK: u8 = 1;
const CMD_DELETE_BLOCK: u8 = 2;
const CMD_START_LOGGING: u8 = 3;
const CMD_STOP_LOGGING: u8 = 4;
const CMD_RESET_LOGGING: u8 = 5;
const CMD_CREATE_BLOCK_V2: u8 = 6;
const CMD_APPEND_BLOCK_V2: u8 = 7;

// firmware errno values tolerated on settings replies
const ERR_ENOENT: u8 = 2;
const ERR_EEXIST: u8 = 17;

const NO_FETCH_KIND: u8 = 0xff;
const NO_BLOCK_ID: u8 = 0xff;

/// Per-element info of the log table of contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LogItemInfo {
    pub ctype: LogValueKind,
    pub readonly: bool,
}

impl TryFrom<u8> for LogItemInfo {
    type Error = Error;

    fn try_from(type_byte: u8) -> Result<Self> {
        Ok(LogItemInfo {
            ctype: LogValueKind::try_from(type_byte & 0x0f)?,
            readonly: type_byte & 0x10 != 0,
        })
    }
}

/// Life cycle of a log block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Declared but not yet sent to the device
    Idle,
    /// Create frames sent, waiting for the acknowledge
    PendingCreate,
    /// Accepted by the device
    Added,
    /// Streaming data
    Started,
    /// Removed from the device
    Deleted,
    /// The device reported an error; see [LogConfig::error_code]
    Errored,
}

impl BlockState {
    fn from_u8(value: u8) -> BlockState {
        match value {
            1 => BlockState::PendingCreate,
            2 => BlockState::Added,
            3 => BlockState::Started,
            4 => BlockState::Deleted,
            5 => BlockState::Errored,
            _ => BlockState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariableSource {
    Toc,
    Memory,
}

/// One logged variable and its latest-sample cell.
///
/// The cell is a single 64-bit atomic packing the raw value bytes in the
/// low word and the device timestamp in the high word, so readers never
/// see a torn sample.
#[derive(Debug)]
pub struct LogVariable {
    name: String,
    address: u32,
    source: VariableSource,
    fetch_as: AtomicU8,
    cell: AtomicU64,
}

impl LogVariable {
    /// A TOC variable fetched as its native type, resolved when the block
    /// is added.
    pub fn by_name(name: &str) -> LogVariable {
        LogVariable {
            name: name.to_owned(),
            address: 0,
            source: VariableSource::Toc,
            fetch_as: AtomicU8::new(NO_FETCH_KIND),
            cell: AtomicU64::new(0),
        }
    }

    /// A TOC variable converted to `fetch_as` by the firmware.
    pub fn by_name_as(name: &str, fetch_as: LogValueKind) -> LogVariable {
        LogVariable {
            name: name.to_owned(),
            address: 0,
            source: VariableSource::Toc,
            fetch_as: AtomicU8::new(fetch_as.into()),
            cell: AtomicU64::new(0),
        }
    }

    /// A raw memory location logged as `fetch_as`.
    pub fn from_memory(address: u32, fetch_as: LogValueKind) -> LogVariable {
        LogVariable {
            name: format!("mem@0x{:08x}", address),
            address,
            source: VariableSource::Memory,
            fetch_as: AtomicU8::new(fetch_as.into()),
            cell: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_toc_variable(&self) -> bool {
        self.source == VariableSource::Toc
    }

    fn fetch_kind(&self) -> Option<LogValueKind> {
        LogValueKind::try_from(self.fetch_as.load(Relaxed)).ok()
    }

    fn set_fetch_kind(&self, kind: LogValueKind) {
        self.fetch_as.store(kind.into(), Relaxed);
    }

    /// Storage type in the low nibble, fetch type in the high nibble.
    fn storage_and_fetch_byte(&self) -> u8 {
        let fetch = self.fetch_as.load(Relaxed) & 0x0f;
        fetch | (fetch << 4)
    }

    /// Publish one sample from the wire. Returns the bytes consumed.
    fn set_from_wire(&self, bytes: &[u8], timestamp: u32) -> usize {
        let Some(kind) = self.fetch_kind() else {
            return 0;
        };
        let size = kind.size();
        let mut raw = [0u8; 8];
        raw[..size].copy_from_slice(&bytes[..size]);
        raw[4..].copy_from_slice(&timestamp.to_le_bytes());
        self.cell.store(u64::from_le_bytes(raw), Relaxed);
        size
    }

    /// Latest sample as a float, with its device timestamp.
    pub fn fetch_float(&self) -> (f32, u32) {
        let raw = self.cell.load(Relaxed).to_le_bytes();
        let timestamp = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let value = self
            .fetch_kind()
            .and_then(|kind| kind.unpack_f32(&raw[..4]).ok())
            .unwrap_or(0.0);
        (value, timestamp)
    }

    /// Latest sample as an integer, with its device timestamp.
    pub fn fetch_int(&self) -> (i64, u32) {
        let raw = self.cell.load(Relaxed).to_le_bytes();
        let timestamp = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let value = self
            .fetch_kind()
            .and_then(|kind| kind.unpack_i64(&raw[..4]).ok())
            .unwrap_or(0);
        (value, timestamp)
    }
}

/// A host-declared log block: named variables streamed at one period.
///
/// Variables are added before the block is handed to [Log::add_config];
/// the handles stay shared between the caller (which polls the cells) and
/// the engine (which fills them).
#[derive(Debug)]
pub struct LogConfig {
    name: String,
    period_in_ms: u32,
    variables: Mutex<Vec<Arc<LogVariable>>>,
    state: AtomicU8,
    err_no: AtomicU8,
    id: AtomicU8,
}

impl LogConfig {
    /// Declare a block refreshed every `period_in_ms` milliseconds.
    pub fn new(name: &str, period_in_ms: u32) -> LogConfig {
        LogConfig {
            name: name.to_owned(),
            period_in_ms,
            variables: Mutex::new(Vec::new()),
            state: AtomicU8::new(BlockState::Idle as u8),
            err_no: AtomicU8::new(0),
            id: AtomicU8::new(NO_BLOCK_ID),
        }
    }

    /// Append a variable. The layout on the wire follows declaration
    /// order.
    pub fn add_variable(&self, variable: &Arc<LogVariable>) {
        self.variables.lock().unwrap().push(variable.clone());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BlockState {
        BlockState::from_u8(self.state.load(Relaxed))
    }

    pub fn is_started(&self) -> bool {
        self.state() == BlockState::Started
    }

    /// Error reported by the firmware, 0 when none.
    pub fn error_code(&self) -> u8 {
        self.err_no.load(Relaxed)
    }

    /// Block id on the device, assigned by [Log::add_config].
    pub fn id(&self) -> Option<u8> {
        match self.id.load(Relaxed) {
            NO_BLOCK_ID => None,
            id => Some(id),
        }
    }

    fn set_state(&self, state: BlockState) {
        self.state.store(state as u8, Relaxed);
    }

    fn set_error(&self, err_no: u8) {
        self.err_no.store(err_no, Relaxed);
        self.set_state(BlockState::Errored);
    }

    fn wire_period(&self) -> u8 {
        (self.period_in_ms / 10) as u8
    }

    fn variable_count(&self) -> usize {
        self.variables.lock().unwrap().len()
    }

    /// Unpack one data payload into the variable cells, in declaration
    /// order.
    fn unpack_log_data(&self, data: &[u8], timestamp: u32) {
        let variables = self.variables.lock().unwrap();
        let mut index = 0;
        for variable in variables.iter() {
            let size = variable.fetch_kind().map(|k| k.size()).unwrap_or(0);
            if data.len() < index + size {
                warn!("short data packet for block {}", self.name);
                break;
            }
            index += variable.set_from_wire(&data[index..], timestamp);
        }
    }
}

/// # Access to the log subsystem
///
/// Handles the TOC download on the LOGGING port and the life cycle of
/// every log block of the connection.
pub struct Log {
    uplink: Arc<Uplink>,
    cache: TocCache,
    toc: Mutex<Toc<LogItemInfo>>,
    fetcher: Mutex<TocFetcher>,
    blocks: Mutex<Vec<Arc<LogConfig>>>,
    reset_complete: AtomicBool,
    protocol_version: AtomicU8,
}

impl Log {
    pub(crate) fn new(uplink: Arc<Uplink>, cache: TocCache) -> Log {
        Log {
            uplink,
            cache,
            toc: Mutex::new(Toc::new()),
            fetcher: Mutex::new(TocFetcher::new(Port::Logging, NO_PROTOCOL)),
            blocks: Mutex::new(Vec::new()),
            reset_complete: AtomicBool::new(false),
            protocol_version: AtomicU8::new(NO_PROTOCOL),
        }
    }

    pub(crate) fn configure(&self, protocol_version: u8) {
        self.protocol_version.store(protocol_version, Relaxed);
    }

    fn use_v2(&self) -> bool {
        let version = self.protocol_version.load(Relaxed);
        version != NO_PROTOCOL && version >= 4
    }

    fn check_connected(&self) -> Result<()> {
        if self.uplink.is_ok() {
            Ok(())
        } else {
            Err(Error::Disconnected)
        }
    }

    /// True once the TOC is complete for this connection.
    pub fn reset_complete(&self) -> bool {
        self.reset_complete.load(Relaxed)
    }

    /// Clear the TOC and ask the device to forget every block. The TOC
    /// fetch restarts when the reset is acknowledged.
    pub(crate) fn reset(&self) {
        info!("resetting the log subsystem");
        self.reset_complete.store(false, Relaxed);
        self.toc.lock().unwrap().clear();
        *self.fetcher.lock().unwrap() =
            TocFetcher::new(Port::Logging, self.protocol_version.load(Relaxed));
        self.uplink
            .send(Port::Logging, CHAN_SETTINGS, vec![CMD_RESET_LOGGING]);
    }

    /// The "group.name" of every log variable the device exposes.
    pub fn names(&self) -> Vec<String> {
        self.toc.lock().unwrap().complete_names()
    }

    /// Native type of a log variable.
    pub fn get_type(&self, name: &str) -> Result<LogValueKind> {
        self.toc
            .lock()
            .unwrap()
            .get_element_by_complete_name(name)
            .map(|element| element.info.ctype)
            .ok_or_else(|| Error::VariableNotFound(name.to_owned()))
    }

    /// Register a block and send it to the device.
    ///
    /// TOC variables without an explicit fetch type are resolved to their
    /// native type here. The call is rejected when the connection is
    /// down, a variable is unknown, the period does not fit the wire, or
    /// a block, variable or payload budget would be exceeded. On success
    /// create frames go out and the block starts automatically once the
    /// device acknowledges them.
    pub fn add_config(&self, config: &Arc<LogConfig>) -> Result<()> {
        self.check_connected()?;
        let period = config.period_in_ms / 10;
        if period == 0 || period > 255 {
            return Err(Error::InvalidArgument(format!(
                "log period of {}ms is outside 10..2550ms",
                config.period_in_ms
            )));
        }

        {
            let toc = self.toc.lock().unwrap();
            let variables = config.variables.lock().unwrap();
            let mut payload_size = 0;
            for variable in variables.iter() {
                if variable.is_toc_variable() {
                    let element = toc
                        .get_element_by_complete_name(variable.name())
                        .ok_or_else(|| Error::VariableNotFound(variable.name().to_owned()))?;
                    if variable.fetch_kind().is_none() {
                        variable.set_fetch_kind(element.info.ctype);
                    }
                }
                let kind = variable.fetch_kind().ok_or_else(|| {
                    Error::LogError(format!("variable {} has no fetch type", variable.name()))
                })?;
                payload_size += kind.size();
            }
            if payload_size > MAX_BLOCK_PAYLOAD {
                return Err(Error::ResourceExceeded(format!(
                    "block {} needs {} data bytes, limit is {}",
                    config.name, payload_size, MAX_BLOCK_PAYLOAD
                )));
            }
        }

        let id = {
            let mut blocks = self.blocks.lock().unwrap();
            let live: Vec<_> = blocks
                .iter()
                .filter(|b| {
                    matches!(
                        b.state(),
                        BlockState::PendingCreate | BlockState::Added | BlockState::Started
                    )
                })
                .collect();
            if live.len() + 1 > MAX_BLOCKS {
                return Err(Error::ResourceExceeded(format!(
                    "{} log blocks are live, limit is {}",
                    live.len(),
                    MAX_BLOCKS
                )));
            }
            let live_variables: usize = live.iter().map(|b| b.variable_count()).sum();
            if live_variables + config.variable_count() > MAX_VARIABLES {
                return Err(Error::ResourceExceeded(format!(
                    "adding block {} would exceed {} total variables",
                    config.name, MAX_VARIABLES
                )));
            }
            if blocks.len() >= NO_BLOCK_ID as usize {
                return Err(Error::ResourceExceeded(
                    "no more block identifiers available".to_owned(),
                ));
            }
            let id = blocks.len() as u8;
            config.id.store(id, Relaxed);
            config.err_no.store(0, Relaxed);
            config.set_state(BlockState::PendingCreate);
            blocks.push(config.clone());
            id
        };

        self.send_block_frames(config, id);
        Ok(())
    }

    /// Pack the block layout into a create frame plus as many append
    /// frames as needed.
    fn send_block_frames(&self, config: &LogConfig, id: u8) {
        let (create_cmd, append_cmd) = if self.use_v2() {
            (CMD_CREATE_BLOCK_V2, CMD_APPEND_BLOCK_V2)
        } else {
            (CMD_CREATE_BLOCK, CMD_APPEND_BLOCK)
        };

        let toc = self.toc.lock().unwrap();
        let variables = config.variables.lock().unwrap();

        let mut frame = vec![create_cmd, id];
        for variable in variables.iter() {
            let mut descriptor = Vec::with_capacity(5);
            descriptor.push(variable.storage_and_fetch_byte());
            if variable.is_toc_variable() {
                let Some(element_id) = toc.element_id(variable.name()) else {
                    warn!("variable {} vanished from the TOC", variable.name());
                    continue;
                };
                if self.use_v2() {
                    descriptor.extend_from_slice(&element_id.to_le_bytes());
                } else {
                    descriptor.push((element_id & 0xff) as u8);
                }
            } else {
                descriptor.extend_from_slice(&variable.address.to_le_bytes());
            }

            if frame.len() + descriptor.len() > MAX_BLOCK_PAYLOAD {
                self.uplink.send(Port::Logging, CHAN_SETTINGS, frame);
                frame = vec![append_cmd, id];
            }
            frame.extend_from_slice(&descriptor);
        }
        self.uplink.send(Port::Logging, CHAN_SETTINGS, frame);
    }

    /// Restart a block that was stopped.
    pub fn start_config(&self, config: &LogConfig) -> Result<()> {
        self.check_connected()?;
        let id = config
            .id()
            .ok_or_else(|| Error::LogError("block has not been added".to_owned()))?;
        match config.state() {
            BlockState::Added | BlockState::Started => {
                self.uplink.send(
                    Port::Logging,
                    CHAN_SETTINGS,
                    vec![CMD_START_LOGGING, id, config.wire_period()],
                );
                Ok(())
            }
            BlockState::Errored => Err(Error::DeviceError(config.error_code())),
            state => Err(Error::LogError(format!(
                "cannot start block {} in state {:?}",
                config.name, state
            ))),
        }
    }

    /// Stop one block; it stays on the device and can be started again.
    pub fn stop_config(&self, config: &LogConfig) -> Result<()> {
        self.check_connected()?;
        let id = config
            .id()
            .ok_or_else(|| Error::LogError("block has not been added".to_owned()))?;
        self.uplink
            .send(Port::Logging, CHAN_SETTINGS, vec![CMD_STOP_LOGGING, id]);
        Ok(())
    }

    /// Delete one block from the device.
    pub fn delete_config(&self, config: &LogConfig) -> Result<()> {
        self.check_connected()?;
        let id = config
            .id()
            .ok_or_else(|| Error::LogError("block has not been added".to_owned()))?;
        self.uplink
            .send(Port::Logging, CHAN_SETTINGS, vec![CMD_DELETE_BLOCK, id]);
        Ok(())
    }

    /// Drop every client-side subscription and broadcast a stop. The TOC
    /// is cleared and will be fetched again on the next connection.
    pub fn stop(&self) {
        self.clear_block_list();
        self.toc.lock().unwrap().clear();
        self.reset_complete.store(false, Relaxed);
        self.uplink
            .send(Port::Logging, CHAN_SETTINGS, vec![CMD_STOP_LOGGING]);
    }

    fn clear_block_list(&self) {
        let mut blocks = self.blocks.lock().unwrap();
        for block in blocks.iter() {
            block.set_state(BlockState::Idle);
            block.id.store(NO_BLOCK_ID, Relaxed);
        }
        blocks.clear();
    }

    pub(crate) fn handle_packet(&self, pk: &Packet) {
        match pk.channel() {
            CHAN_TOC => self.handle_toc_reply(pk),
            CHAN_SETTINGS => self.handle_settings_reply(pk),
            CHAN_LOGDATA => self.handle_log_data(pk),
            _ => {}
        }
    }

    fn handle_toc_reply(&self, pk: &Packet) {
        let mut toc = self.toc.lock().unwrap();
        let mut fetcher = self.fetcher.lock().unwrap();
        match fetcher.handle_packet(pk, &mut toc, &self.cache, &self.uplink) {
            Ok(true) => {
                info!("log TOC ready ({} items)", toc.id_count());
                self.reset_complete.store(true, Relaxed);
            }
            Ok(false) => {}
            Err(e) => report_fetch_error(Port::Logging, &e),
        }
    }

    fn handle_settings_reply(&self, pk: &Packet) {
        let data = pk.payload();
        let Some(&cmd) = data.first() else {
            return;
        };

        if cmd == CMD_RESET_LOGGING {
            let needs_fetch = {
                let toc = self.toc.lock().unwrap();
                !toc.complete && toc.id_count() == 0
            };
            if needs_fetch {
                self.clear_block_list();
                self.fetcher.lock().unwrap().start(&self.uplink);
            }
            return;
        }

        if data.len() < 3 {
            return;
        }
        let id = data[1];
        let status = data[2];
        let block = self.blocks.lock().unwrap().get(id as usize).cloned();
        let Some(block) = block else {
            debug!("settings reply for unknown block id {}", id);
            return;
        };

        match cmd {
            CMD_CREATE_BLOCK | CMD_CREATE_BLOCK_V2 => {
                if status == 0 || status == ERR_EEXIST {
                    if block.state() == BlockState::PendingCreate {
                        self.uplink.send(
                            Port::Logging,
                            CHAN_SETTINGS,
                            vec![CMD_START_LOGGING, id, block.wire_period()],
                        );
                        block.set_state(BlockState::Added);
                    } else {
                        // a create acknowledge the block was not waiting for
                        warn!("unexpected create reply for block {}", block.name);
                        block.set_error(status);
                    }
                } else {
                    warn!("creating block {} failed: error {}", block.name, status);
                    block.set_error(status);
                }
            }
            CMD_START_LOGGING => {
                if status == 0 {
                    info!("log block {} started", block.name);
                    block.set_state(BlockState::Started);
                } else {
                    warn!("starting block {} failed: error {}", block.name, status);
                    block.set_error(status);
                }
            }
            CMD_STOP_LOGGING => {
                if status == 0 {
                    block.set_state(BlockState::Added);
                }
            }
            CMD_DELETE_BLOCK => {
                if status == 0 || status == ERR_ENOENT {
                    block.set_state(BlockState::Deleted);
                } else {
                    warn!("deleting block {} failed: error {}", block.name, status);
                    block.set_error(status);
                }
            }
            _ => {}
        }
    }

    fn handle_log_data(&self, pk: &Packet) {
        let data = pk.payload();
        if data.len() < 4 {
            return;
        }
        let id = data[0];
        let block = self.blocks.lock().unwrap().get(id as usize).cloned();
        let Some(block) = block else {
            return;
        };
        // three little-endian bytes, zero-extended to the host timestamp
        let timestamp = u32::from_le_bytes([data[1], data[2], data[3], 0]);
        block.set_state(BlockState::Started);
        block.unpack_log_data(&data[4..], timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingLink;

    fn engine_with_toc() -> (Arc<RecordingLink>, Log) {
        let link = RecordingLink::new();
        let log = Log::new(Arc::new(link.uplink()), TocCache::disabled());
        log.configure(6);
        {
            let mut toc = log.toc.lock().unwrap();
            for (i, name) in ["x", "y", "z", "vx", "vy", "vz", "yaw"].iter().enumerate() {
                toc.add_element(
                    i as u16,
                    "state",
                    name,
                    LogItemInfo {
                        ctype: LogValueKind::F32,
                        readonly: false,
                    },
                );
            }
            toc.add_element(
                7,
                "pm",
                "vbat",
                LogItemInfo {
                    ctype: LogValueKind::U8,
                    readonly: false,
                },
            );
            toc.crc = 0x1;
            toc.complete = true;
        }
        log.reset_complete.store(true, Relaxed);
        (link, log)
    }

    fn f32_block(names: &[&str], period_ms: u32) -> Arc<LogConfig> {
        let config = Arc::new(LogConfig::new("test", period_ms));
        for name in names {
            config.add_variable(&Arc::new(LogVariable::by_name(name)));
        }
        config
    }

    #[test]
    fn six_floats_fit_a_seventh_does_not() {
        let (_, log) = engine_with_toc();
        let six = f32_block(
            &["state.x", "state.y", "state.z", "state.vx", "state.vy", "state.vz"],
            100,
        );
        assert!(log.add_config(&six).is_ok());

        let (_, log) = engine_with_toc();
        let seven = f32_block(
            &[
                "state.x", "state.y", "state.z", "state.vx", "state.vy", "state.vz", "state.yaw",
            ],
            100,
        );
        assert!(matches!(
            log.add_config(&seven),
            Err(Error::ResourceExceeded(_))
        ));
    }

    #[test]
    fn unknown_variable_is_rejected() {
        let (_, log) = engine_with_toc();
        let config = f32_block(&["state.missing"], 100);
        assert!(matches!(
            log.add_config(&config),
            Err(Error::VariableNotFound(_))
        ));
        assert_eq!(config.state(), BlockState::Idle);
    }

    #[test]
    fn period_must_fit_the_wire() {
        let (_, log) = engine_with_toc();
        assert!(matches!(
            log.add_config(&f32_block(&["state.x"], 0)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            log.add_config(&f32_block(&["state.x"], 5)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            log.add_config(&f32_block(&["state.x"], 2560)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(log.add_config(&f32_block(&["state.x"], 2550)).is_ok());
    }

    #[test]
    fn block_count_is_limited() {
        let (_, log) = engine_with_toc();
        for i in 0..MAX_BLOCKS {
            let config = f32_block(&["state.x"], 100);
            assert!(log.add_config(&config).is_ok(), "block {} rejected", i);
        }
        assert!(matches!(
            log.add_config(&f32_block(&["state.x"], 100)),
            Err(Error::ResourceExceeded(_))
        ));
    }

    #[test]
    fn deleted_blocks_free_their_slot() {
        let (_, log) = engine_with_toc();
        for _ in 0..MAX_BLOCKS {
            log.add_config(&f32_block(&["state.x"], 100)).unwrap();
        }
        // delete acknowledge for block 0 frees one slot
        let reply = Packet::new(Port::Logging, CHAN_SETTINGS, vec![CMD_DELETE_BLOCK, 0, 0]).unwrap();
        log.handle_packet(&reply);
        assert!(log.add_config(&f32_block(&["state.x"], 100)).is_ok());
    }

    #[test]
    fn total_variable_budget_is_enforced() {
        let (_, log) = engine_with_toc();
        // blocks of 26 single-byte variables stay inside every per-block
        // budget; the shared limit of 128 variables stops the fifth one
        let mut added = 0;
        loop {
            let config = Arc::new(LogConfig::new("u8s", 100));
            for _ in 0..26 {
                config.add_variable(&Arc::new(LogVariable::by_name("pm.vbat")));
            }
            match log.add_config(&config) {
                Ok(()) => added += 1,
                Err(Error::ResourceExceeded(_)) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
            assert!(added < 6, "variable budget was never enforced");
        }
        assert_eq!(added, 4);
    }

    #[test]
    fn create_frame_layout_v2() {
        let (link, log) = engine_with_toc();
        let config = f32_block(&["state.x", "state.y"], 100);
        log.add_config(&config).unwrap();

        let sent = link.sent();
        assert_eq!(sent.len(), 1);
        let frame = &sent[0];
        assert_eq!(frame.port(), Port::Logging);
        assert_eq!(frame.channel(), CHAN_SETTINGS);
        // create, id, then (type byte, u16 element id) per variable
        assert_eq!(
            frame.payload(),
            &[CMD_CREATE_BLOCK_V2, 0, 0x77, 0, 0, 0x77, 1, 0]
        );
        assert_eq!(config.state(), BlockState::PendingCreate);
    }

    #[test]
    fn long_blocks_continue_in_append_frames() {
        let (link, log) = engine_with_toc();
        let config = Arc::new(LogConfig::new("mem", 100));
        for i in 0..5 {
            // memory descriptors are 5 bytes each, so only four fit the
            // first frame next to the command and id bytes
            config.add_variable(&Arc::new(LogVariable::from_memory(
                0x2000_0000 + i,
                LogValueKind::U32,
            )));
        }
        log.add_config(&config).unwrap();

        let sent = link.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].payload()[0], CMD_CREATE_BLOCK_V2);
        assert_eq!(sent[1].payload()[0], CMD_APPEND_BLOCK_V2);
        assert!(sent.iter().all(|pk| pk.payload().len() <= MAX_BLOCK_PAYLOAD));
        // the append frame carries the fifth descriptor
        assert_eq!(sent[1].payload().len(), 2 + 5);
    }

    #[test]
    fn create_ack_starts_the_block() {
        let (link, log) = engine_with_toc();
        let config = f32_block(&["state.x"], 250);
        log.add_config(&config).unwrap();
        link.clear_sent();

        let ack =
            Packet::new(Port::Logging, CHAN_SETTINGS, vec![CMD_CREATE_BLOCK_V2, 0, 0]).unwrap();
        log.handle_packet(&ack);
        assert_eq!(config.state(), BlockState::Added);
        let sent = link.sent();
        assert_eq!(sent[0].payload(), &[CMD_START_LOGGING, 0, 25]);

        let start_ack =
            Packet::new(Port::Logging, CHAN_SETTINGS, vec![CMD_START_LOGGING, 0, 0]).unwrap();
        log.handle_packet(&start_ack);
        assert_eq!(config.state(), BlockState::Started);
    }

    #[test]
    fn eexist_on_create_is_tolerated() {
        let (_, log) = engine_with_toc();
        let config = f32_block(&["state.x"], 100);
        log.add_config(&config).unwrap();

        let ack = Packet::new(
            Port::Logging,
            CHAN_SETTINGS,
            vec![CMD_CREATE_BLOCK_V2, 0, ERR_EEXIST],
        )
        .unwrap();
        log.handle_packet(&ack);
        assert_eq!(config.state(), BlockState::Added);
    }

    #[test]
    fn device_errors_mark_the_block() {
        let (_, log) = engine_with_toc();
        let config = f32_block(&["state.x"], 100);
        log.add_config(&config).unwrap();

        let ack = Packet::new(Port::Logging, CHAN_SETTINGS, vec![CMD_CREATE_BLOCK_V2, 0, 12])
            .unwrap();
        log.handle_packet(&ack);
        assert_eq!(config.state(), BlockState::Errored);
        assert_eq!(config.error_code(), 12);
    }

    #[test]
    fn data_packets_fill_the_cells_in_order() {
        let (_, log) = engine_with_toc();
        let x = Arc::new(LogVariable::by_name("state.x"));
        let vbat = Arc::new(LogVariable::by_name("pm.vbat"));
        let config = Arc::new(LogConfig::new("mix", 100));
        config.add_variable(&x);
        config.add_variable(&vbat);
        log.add_config(&config).unwrap();

        let mut payload = vec![0, 0x01, 0x02, 0x03];
        payload.extend_from_slice(&1.25f32.to_le_bytes());
        payload.push(37);
        let data = Packet::new(Port::Logging, CHAN_LOGDATA, payload).unwrap();
        log.handle_packet(&data);

        assert_eq!(x.fetch_float(), (1.25, 0x0003_0201));
        assert_eq!(vbat.fetch_int(), (37, 0x0003_0201));
        assert_eq!(config.state(), BlockState::Started);
    }

    #[test]
    fn timestamps_stay_monotonic_across_packets() {
        let (_, log) = engine_with_toc();
        let x = Arc::new(LogVariable::by_name("state.x"));
        let config = Arc::new(LogConfig::new("ts", 100));
        config.add_variable(&x);
        log.add_config(&config).unwrap();

        let mut last = 0;
        for ts in [0x000010u32, 0x000450, 0x123456, 0xffffff] {
            let mut payload = vec![0];
            payload.extend_from_slice(&ts.to_le_bytes()[..3]);
            payload.extend_from_slice(&0f32.to_le_bytes());
            log.handle_packet(&Packet::new(Port::Logging, CHAN_LOGDATA, payload).unwrap());
            let (_, seen) = x.fetch_float();
            assert!(seen >= last);
            assert!(seen < 1 << 24);
            last = seen;
        }
    }

    #[test]
    fn stop_clears_client_state_and_broadcasts() {
        let (link, log) = engine_with_toc();
        let config = f32_block(&["state.x"], 100);
        log.add_config(&config).unwrap();
        link.clear_sent();

        log.stop();
        assert_eq!(config.state(), BlockState::Idle);
        assert_eq!(config.id(), None);
        assert!(log.names().is_empty());
        let sent = link.sent();
        assert_eq!(sent[0].payload(), &[CMD_STOP_LOGGING]);
    }

    #[test]
    fn reset_ack_restarts_the_toc_fetch() {
        let link = RecordingLink::new();
        let log = Log::new(Arc::new(link.uplink()), TocCache::disabled());
        log.configure(6);
        log.reset();
        let sent = link.sent();
        assert_eq!(sent[0].payload(), &[CMD_RESET_LOGGING]);
        link.clear_sent();

        let ack =
            Packet::new(Port::Logging, CHAN_SETTINGS, vec![CMD_RESET_LOGGING, 0, 0]).unwrap();
        log.handle_packet(&ack);
        // the fetcher kicked off with a TOC info request
        let sent = link.sent();
        assert_eq!(sent[0].channel(), CHAN_TOC);
        assert_eq!(sent[0].payload(), &[3]);
    }

    #[test]
    fn dead_link_surfaces_disconnected() {
        let (_, log) = engine_with_toc();
        let config = f32_block(&["state.x"], 100);
        log.add_config(&config).unwrap();

        log.uplink.mark_failed();
        assert!(matches!(
            log.add_config(&f32_block(&["state.y"], 100)),
            Err(Error::Disconnected)
        ));
        assert!(matches!(
            log.start_config(&config),
            Err(Error::Disconnected)
        ));
        assert!(matches!(log.stop_config(&config), Err(Error::Disconnected)));
        assert!(matches!(
            log.delete_config(&config),
            Err(Error::Disconnected)
        ));
    }
}
