//! # Platform services
//!
//! The platform port hosts a couple of utility services: the protocol
//! version handshake used at boot, arming and crash recovery, and the
//! continuous-wave radio test mode.
//!
//! Boot goes through three steps: a source query on the link-control
//! port, the protocol version request once the expected platform identity
//! answers, and finally storing the reported version for the rest of the
//! connection.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::AtomicU8;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::crtp::{Packet, Port, NO_PROTOCOL};
use crate::link::Uplink;

const LINKSERVICE_SOURCE_CHANNEL: u8 = 1;
const LINKCTRL_MISC_CHANNEL: u8 = 3;

const PLATFORM_COMMAND_CHANNEL: u8 = 0;
const VERSION_CHANNEL: u8 = 1;

const PLATFORM_SET_CONT_WAVE: u8 = 0;
const PLATFORM_REQUEST_ARMING: u8 = 1;
const PLATFORM_REQUEST_CRASH_RECOVERY: u8 = 2;

const VERSION_GET_PROTOCOL: u8 = 0;
const VERSION_GET_FIRMWARE: u8 = 1;

const PLATFORM_SOURCE: &[u8] = b"Bitcraze Crazyflie";

/// # Access to the platform services
///
/// See the [platform module documentation](crate::subsystems::platform)
/// for more context and information.
pub struct Platform {
    uplink: Arc<Uplink>,
    protocol_version: AtomicU8,
    link_source: Mutex<Option<String>>,
    firmware_version: Mutex<Option<String>>,
}

impl Platform {
    pub(crate) fn new(uplink: Arc<Uplink>) -> Platform {
        Platform {
            uplink,
            protocol_version: AtomicU8::new(NO_PROTOCOL),
            link_source: Mutex::new(None),
            firmware_version: Mutex::new(None),
        }
    }

    /// The protocol version reported by the device, once known.
    pub fn protocol_version(&self) -> Option<u8> {
        match self.protocol_version.load(Relaxed) {
            NO_PROTOCOL => None,
            version => Some(version),
        }
    }

    pub(crate) fn raw_protocol_version(&self) -> u8 {
        self.protocol_version.load(Relaxed)
    }

    /// Kick off the boot handshake with a link-control source query.
    pub(crate) fn request_version(&self) {
        self.uplink
            .send(Port::LinkCtrl, LINKSERVICE_SOURCE_CHANNEL, vec![0]);
    }

    /// Request the firmware release string. The reply is retained and
    /// read back with [Platform::firmware_version].
    pub fn request_firmware_version(&self) {
        self.uplink
            .send(Port::Platform, VERSION_CHANNEL, vec![VERSION_GET_FIRMWARE]);
    }

    /// The firmware release, for example `2024.10`, once reported.
    pub fn firmware_version(&self) -> Option<String> {
        self.firmware_version.lock().unwrap().clone()
    }

    /// Arm or disarm the safety systems. Disarmed motors never spin.
    pub fn send_arming_request(&self, do_arm: bool) {
        self.uplink.send(
            Port::Platform,
            PLATFORM_COMMAND_CHANNEL,
            vec![PLATFORM_REQUEST_ARMING, u8::from(do_arm)],
        );
    }

    /// Request recovery from a detected crash state.
    pub fn send_crash_recovery_request(&self) {
        self.uplink.send(
            Port::Platform,
            PLATFORM_COMMAND_CHANNEL,
            vec![PLATFORM_REQUEST_CRASH_RECOVERY],
        );
    }

    /// Put the radio in continuous-wave test mode.
    ///
    /// The carrier jams the current channel frequency and drops the radio
    /// link, so this is practically only useful over USB in a controlled
    /// environment.
    pub fn set_cont_wave(&self, activate: bool) {
        self.uplink.send(
            Port::Platform,
            PLATFORM_COMMAND_CHANNEL,
            vec![PLATFORM_SET_CONT_WAVE, u8::from(activate)],
        );
    }

    pub(crate) fn handle_packet(&self, pk: &Packet) {
        match pk.port() {
            Port::LinkCtrl => self.handle_linkctrl(pk),
            Port::Platform => self.handle_platform(pk),
            _ => {}
        }
    }

    /// A source reply carrying the platform identity string triggers the
    /// protocol version request, once.
    fn handle_linkctrl(&self, pk: &Packet) {
        if pk.channel() != LINKSERVICE_SOURCE_CHANNEL && pk.channel() != LINKCTRL_MISC_CHANNEL {
            return;
        }
        if !pk.payload().starts_with(PLATFORM_SOURCE) {
            return;
        }
        let mut link_source = self.link_source.lock().unwrap();
        if link_source.is_none() {
            *link_source = Some(String::from_utf8_lossy(PLATFORM_SOURCE).into_owned());
            debug!("link source identified, requesting the protocol version");
            self.uplink
                .send(Port::Platform, VERSION_CHANNEL, vec![VERSION_GET_PROTOCOL]);
        }
    }

    fn handle_platform(&self, pk: &Packet) {
        if pk.channel() != VERSION_CHANNEL || pk.payload().is_empty() {
            return;
        }
        match pk.payload()[0] {
            VERSION_GET_PROTOCOL => {
                if let Some(&version) = pk.payload().get(1) {
                    info!("device protocol version: {}", version);
                    self.protocol_version.store(version, Relaxed);
                }
            }
            VERSION_GET_FIRMWARE => {
                let version = String::from_utf8_lossy(&pk.payload()[1..]).into_owned();
                *self.firmware_version.lock().unwrap() = Some(version);
            }
            _ => {}
        }
    }
}
