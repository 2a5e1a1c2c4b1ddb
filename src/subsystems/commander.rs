//! # Low-level setpoint subsystem
//!
//! Setpoints set the instant target state of the craft, so they need to
//! be sent continuously to hold a flight profile; the firmware falls back
//! to lower-priority setpoints (and eventually cuts the motors) when none
//! arrive. Every call here packs one packet and sends it best-effort,
//! nothing is retried or acknowledged.
//!
//! The legacy RPYT setpoint travels on its own port; every newer setpoint
//! goes through the generic setpoint port with a type byte up front.

use std::sync::Arc;

use crate::crtp::Port;
use crate::link::Uplink;
use crate::packing;

const SETPOINT_CHANNEL: u8 = 0;
const META_COMMAND_CHANNEL: u8 = 1;

// generic setpoint type identifiers
const TYPE_STOP: u8 = 0;
const TYPE_VELOCITY_WORLD: u8 = 1;
const TYPE_ZDISTANCE: u8 = 2;
const TYPE_HOVER: u8 = 5;
const TYPE_FULL_STATE: u8 = 6;
const TYPE_POSITION: u8 = 7;

const META_NOTIFY_SETPOINT_STOP: u8 = 0;

/// # Low-level setpoints
///
/// Stateless packers for the rate-control setpoints. See the
/// [commander module documentation](crate::subsystems::commander) for the
/// safety mechanisms around them.
pub struct Commander {
    uplink: Arc<Uplink>,
}

impl Commander {
    pub(crate) fn new(uplink: Arc<Uplink>) -> Commander {
        Commander { uplink }
    }

    /// Send a roll/pitch/yawrate/thrust setpoint.
    ///
    /// Roll and pitch are in degrees, yawrate in degrees per second and
    /// thrust a 16-bit value. Thrust is locked until a zero-thrust
    /// setpoint has been seen once.
    pub fn send_setpoint(&self, roll: f32, pitch: f32, yawrate: f32, thrust: u16) {
        let mut payload = Vec::with_capacity(3 * 4 + 2);
        payload.extend_from_slice(&roll.to_le_bytes());
        payload.extend_from_slice(&pitch.to_le_bytes());
        payload.extend_from_slice(&yawrate.to_le_bytes());
        payload.extend_from_slice(&thrust.to_le_bytes());
        self.uplink.send(Port::Commander, SETPOINT_CHANNEL, payload);
    }

    /// Send a STOP setpoint, cutting the motors immediately.
    pub fn send_stop_setpoint(&self) {
        self.uplink
            .send(Port::CommanderGeneric, SETPOINT_CHANNEL, vec![TYPE_STOP]);
    }

    /// Lower the priority of the current setpoint so that any new
    /// setpoint, from any source, overrides it after
    /// `remain_valid_milliseconds`.
    pub fn send_notify_setpoint_stop(&self, remain_valid_milliseconds: u32) {
        let mut payload = Vec::with_capacity(1 + 4);
        payload.push(META_NOTIFY_SETPOINT_STOP);
        payload.extend_from_slice(&remain_valid_milliseconds.to_le_bytes());
        self.uplink
            .send(Port::CommanderGeneric, META_COMMAND_CHANNEL, payload);
    }

    /// Send a world-frame velocity setpoint with yawrate control.
    /// Velocities are in meters per second, yawrate in degrees per second.
    pub fn send_velocity_world_setpoint(&self, vx: f32, vy: f32, vz: f32, yawrate: f32) {
        let mut payload = Vec::with_capacity(1 + 4 * 4);
        payload.push(TYPE_VELOCITY_WORLD);
        payload.extend_from_slice(&vx.to_le_bytes());
        payload.extend_from_slice(&vy.to_le_bytes());
        payload.extend_from_slice(&vz.to_le_bytes());
        payload.extend_from_slice(&yawrate.to_le_bytes());
        self.uplink
            .send(Port::CommanderGeneric, SETPOINT_CHANNEL, payload);
    }

    /// Send roll, pitch and yawrate commands with an absolute height
    /// setpoint (the distance to the surface below, in meters).
    pub fn send_zdistance_setpoint(&self, roll: f32, pitch: f32, yawrate: f32, zdistance: f32) {
        let mut payload = Vec::with_capacity(1 + 4 * 4);
        payload.push(TYPE_ZDISTANCE);
        payload.extend_from_slice(&roll.to_le_bytes());
        payload.extend_from_slice(&pitch.to_le_bytes());
        payload.extend_from_slice(&yawrate.to_le_bytes());
        payload.extend_from_slice(&zdistance.to_le_bytes());
        self.uplink
            .send(Port::CommanderGeneric, SETPOINT_CHANNEL, payload);
    }

    /// Send body-frame x/y velocities with an absolute height setpoint.
    pub fn send_hover_setpoint(&self, vx: f32, vy: f32, yawrate: f32, zdistance: f32) {
        let mut payload = Vec::with_capacity(1 + 4 * 4);
        payload.push(TYPE_HOVER);
        payload.extend_from_slice(&vx.to_le_bytes());
        payload.extend_from_slice(&vy.to_le_bytes());
        payload.extend_from_slice(&yawrate.to_le_bytes());
        payload.extend_from_slice(&zdistance.to_le_bytes());
        self.uplink
            .send(Port::CommanderGeneric, SETPOINT_CHANNEL, payload);
    }

    /// Send an absolute world-frame position setpoint with an absolute
    /// yaw orientation. Positions are in meters, yaw in degrees.
    pub fn send_position_setpoint(&self, x: f32, y: f32, z: f32, yaw: f32) {
        let mut payload = Vec::with_capacity(1 + 4 * 4);
        payload.push(TYPE_POSITION);
        payload.extend_from_slice(&x.to_le_bytes());
        payload.extend_from_slice(&y.to_le_bytes());
        payload.extend_from_slice(&z.to_le_bytes());
        payload.extend_from_slice(&yaw.to_le_bytes());
        self.uplink
            .send(Port::CommanderGeneric, SETPOINT_CHANNEL, payload);
    }

    /// Send the full target state: position, velocity and acceleration in
    /// fixed-point millimeter units, the attitude as a compressed
    /// quaternion and the body rates in millidegrees per second.
    ///
    /// `orientation` is the unit quaternion `[x, y, z, w]`; rates are in
    /// degrees per second.
    #[allow(clippy::too_many_arguments)]
    pub fn send_full_state_setpoint(
        &self,
        pos: [f32; 3],
        vel: [f32; 3],
        acc: [f32; 3],
        orientation: [f32; 4],
        rollrate: f32,
        pitchrate: f32,
        yawrate: f32,
    ) {
        let mut payload = Vec::with_capacity(1 + 9 * 2 + 4 + 3 * 2);
        payload.push(TYPE_FULL_STATE);
        for value in pos.iter().chain(vel.iter()).chain(acc.iter()) {
            payload.extend_from_slice(&((value * 1000.0) as i16).to_le_bytes());
        }
        payload.extend_from_slice(&packing::quatcompress(orientation).to_le_bytes());
        for rate in [rollrate, pitchrate, yawrate] {
            payload.extend_from_slice(&((rate * 1000.0) as i16).to_le_bytes());
        }
        self.uplink
            .send(Port::CommanderGeneric, SETPOINT_CHANNEL, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingLink;

    fn commander() -> (Arc<RecordingLink>, Commander) {
        let link = RecordingLink::new();
        let commander = Commander::new(Arc::new(link.uplink()));
        (link, commander)
    }

    #[test]
    fn position_setpoint_layout() {
        let (link, commander) = commander();
        commander.send_position_setpoint(1.0, 2.0, 0.5, 0.0);

        let pk = &link.sent()[0];
        assert_eq!(pk.port(), Port::CommanderGeneric);
        assert_eq!(pk.port().id(), 7);
        assert_eq!(pk.channel(), 0);

        let mut expected = vec![TYPE_POSITION];
        expected.extend_from_slice(&1.0f32.to_le_bytes());
        expected.extend_from_slice(&2.0f32.to_le_bytes());
        expected.extend_from_slice(&0.5f32.to_le_bytes());
        expected.extend_from_slice(&0.0f32.to_le_bytes());
        assert_eq!(pk.payload(), expected.as_slice());
    }

    #[test]
    fn rpyt_setpoint_uses_the_commander_port() {
        let (link, commander) = commander();
        commander.send_setpoint(0.0, 0.0, 0.0, 1000);

        let pk = &link.sent()[0];
        assert_eq!(pk.port(), Port::Commander);
        assert_eq!(pk.payload().len(), 14);
        assert_eq!(&pk.payload()[12..], &1000u16.to_le_bytes());
    }

    #[test]
    fn stop_and_notify_stop_layout() {
        let (link, commander) = commander();
        commander.send_stop_setpoint();
        commander.send_notify_setpoint_stop(250);

        let sent = link.sent();
        assert_eq!(sent[0].payload(), &[TYPE_STOP]);
        assert_eq!(sent[0].channel(), SETPOINT_CHANNEL);
        assert_eq!(sent[1].channel(), META_COMMAND_CHANNEL);
        let mut expected = vec![META_NOTIFY_SETPOINT_STOP];
        expected.extend_from_slice(&250u32.to_le_bytes());
        assert_eq!(sent[1].payload(), expected.as_slice());
    }

    #[test]
    fn hover_and_velocity_carry_their_type_byte() {
        let (link, commander) = commander();
        commander.send_hover_setpoint(0.1, 0.2, 0.0, 0.4);
        commander.send_velocity_world_setpoint(1.0, 0.0, 0.0, 0.0);
        commander.send_zdistance_setpoint(0.0, 0.0, 0.0, 1.0);

        let sent = link.sent();
        assert_eq!(sent[0].payload()[0], TYPE_HOVER);
        assert_eq!(sent[1].payload()[0], TYPE_VELOCITY_WORLD);
        assert_eq!(sent[2].payload()[0], TYPE_ZDISTANCE);
        assert!(sent.iter().all(|pk| pk.payload().len() == 17));
    }

    #[test]
    fn full_state_uses_fixed_point_millimeters() {
        let (link, commander) = commander();
        commander.send_full_state_setpoint(
            [1.0, -0.5, 0.25],
            [0.0; 3],
            [0.0; 3],
            [0.0, 0.0, 0.0, 1.0],
            0.0,
            0.0,
            30.0,
        );

        let pk = &link.sent()[0];
        let data = pk.payload();
        assert_eq!(data[0], TYPE_FULL_STATE);
        assert_eq!(data.len(), 1 + 9 * 2 + 4 + 3 * 2);
        assert_eq!(&data[1..3], &1000i16.to_le_bytes());
        assert_eq!(&data[3..5], &(-500i16).to_le_bytes());
        assert_eq!(&data[5..7], &250i16.to_le_bytes());
        // identity quaternion: largest index 3, all else zero
        assert_eq!(&data[19..23], &(3u32 << 30).to_le_bytes());
        assert_eq!(&data[27..29], &30_000i16.to_le_bytes());
    }
}
