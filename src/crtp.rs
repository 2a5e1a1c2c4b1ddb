//! # CRTP packet model
//!
//! One physical link multiplexes every subsystem through small fixed-MTU
//! frames. The single header byte carries `(port:4, link bits:2,
//! channel:2)`; the payload is at most [MAX_PAYLOAD] bytes. Each port
//! addresses one subsystem and each port defines its own channel meaning.

use crate::{Error, Result};

/// Total size of a radio frame, header included.
pub const CRTP_MTU: usize = 32;

/// Largest payload a packet can carry.
pub const MAX_PAYLOAD: usize = 30;

/// Identifier value marking "no TOC element".
pub(crate) const NO_IDENT: u16 = 0xffff;

/// Protocol version value meaning "not yet known".
pub(crate) const NO_PROTOCOL: u8 = 0xff;

/// CRTP ports, one per subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Port {
    /// Text console output from the firmware
    Console = 0x00,
    /// Parameter read/write subsystem
    Param = 0x02,
    /// Low-level RPYT setpoints
    Commander = 0x03,
    /// Memory subsystem
    Mem = 0x04,
    /// Telemetry log blocks
    Logging = 0x05,
    /// External position and localization packets
    Localization = 0x06,
    /// Generic typed setpoints
    CommanderGeneric = 0x07,
    /// High-level trajectory commander
    SetpointHl = 0x08,
    /// Platform services and version handshake
    Platform = 0x0d,
    /// Link-layer control
    LinkCtrl = 0x0f,
}

impl Port {
    /// The port number as it appears in the packet header.
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Port {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        let port = match id {
            0x00 => Port::Console,
            0x02 => Port::Param,
            0x03 => Port::Commander,
            0x04 => Port::Mem,
            0x05 => Port::Logging,
            0x06 => Port::Localization,
            0x07 => Port::CommanderGeneric,
            0x08 => Port::SetpointHl,
            0x0d => Port::Platform,
            0x0f => Port::LinkCtrl,
            _ => return Err(Error::ProtocolError(format!("unknown CRTP port: {}", id))),
        };
        Ok(port)
    }
}

/// One CRTP frame: a port, a channel and up to [MAX_PAYLOAD] payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    port: Port,
    channel: u8,
    payload: Vec<u8>,
}

impl Packet {
    /// Build a packet. Fails if the payload exceeds [MAX_PAYLOAD] or the
    /// channel does not fit its two header bits.
    pub fn new(port: Port, channel: u8, payload: Vec<u8>) -> Result<Packet> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::ProtocolError(format!(
                "payload of {} bytes exceeds the {} byte maximum",
                payload.len(),
                MAX_PAYLOAD
            )));
        }
        if channel > 0x03 {
            return Err(Error::ProtocolError(format!(
                "channel {} does not fit the header",
                channel
            )));
        }
        Ok(Packet {
            port,
            channel,
            payload,
        })
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The header byte: port in the high nibble, the two link bits set,
    /// channel in the low two bits.
    pub fn header(&self) -> u8 {
        (self.port.id() << 4) | (0x3 << 2) | (self.channel & 0x03)
    }

    /// Serialize to the wire form `[header][payload...]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.payload.len());
        bytes.push(self.header());
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

impl TryFrom<&[u8]> for Packet {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let header = *bytes
            .first()
            .ok_or_else(|| Error::ProtocolError("empty frame".to_owned()))?;
        let port = Port::try_from(header >> 4)?;
        let channel = header & 0x03;
        Packet::new(port, channel, bytes[1..].to_vec())
    }
}
