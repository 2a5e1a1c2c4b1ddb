//! # High-level commander subsystem
//!
//! The high-level commander is the firmware module that turns actions
//! such as *take off*, *go to* and *land* into smooth position setpoints
//! on board. The host side only packs commands; trajectories must have
//! been uploaded to trajectory memory before they are defined and
//! started.
//!
//! Every command carries a group mask selecting a subset of a swarm;
//! [ALL_GROUPS] addresses every craft.

use std::sync::Arc;

use crate::crtp::Port;
use crate::link::Uplink;

const COMMAND_SET_GROUP_MASK: u8 = 0;
const COMMAND_STOP: u8 = 3;
const COMMAND_GO_TO: u8 = 4;
const COMMAND_START_TRAJECTORY: u8 = 5;
const COMMAND_DEFINE_TRAJECTORY: u8 = 6;
const COMMAND_TAKEOFF_2: u8 = 7;
const COMMAND_LAND_2: u8 = 8;

/// Group mask addressing every craft.
pub const ALL_GROUPS: u8 = 0;

const TRAJECTORY_LOCATION_MEM: u8 = 1;

/// Uncompressed 4D polynomial trajectory data.
pub const TRAJECTORY_TYPE_POLY4D: u8 = 0;
/// Compressed 4D polynomial trajectory data.
pub const TRAJECTORY_TYPE_POLY4D_COMPRESSED: u8 = 1;

/// # High-level flight commands
///
/// Stateless packers for the trajectory commander. All commands are
/// best-effort fire-and-forget; the firmware reports nothing back.
pub struct HighLevelCommander {
    uplink: Arc<Uplink>,
}

impl HighLevelCommander {
    pub(crate) fn new(uplink: Arc<Uplink>) -> HighLevelCommander {
        HighLevelCommander { uplink }
    }

    fn send(&self, payload: Vec<u8>) {
        self.uplink.send(Port::SetpointHl, 0, payload);
    }

    /// Set the group membership of the craft.
    pub fn set_group_mask(&self, group_mask: u8) {
        self.send(vec![COMMAND_SET_GROUP_MASK, group_mask]);
    }

    /// Take off vertically from the current x-y position to
    /// `absolute_height_m`, keeping the current yaw, over `duration_s`
    /// seconds.
    pub fn takeoff(&self, absolute_height_m: f32, duration_s: f32, group_mask: u8) {
        let mut payload = Vec::with_capacity(3 + 3 * 4);
        payload.push(COMMAND_TAKEOFF_2);
        payload.push(group_mask);
        payload.extend_from_slice(&absolute_height_m.to_le_bytes());
        payload.extend_from_slice(&0f32.to_le_bytes());
        payload.push(1); // keep the current yaw
        payload.extend_from_slice(&duration_s.to_le_bytes());
        self.send(payload);
    }

    /// Land vertically from the current x-y position to
    /// `absolute_height_m`, keeping the current yaw, over `duration_s`
    /// seconds.
    pub fn land(&self, absolute_height_m: f32, duration_s: f32, group_mask: u8) {
        let mut payload = Vec::with_capacity(3 + 3 * 4);
        payload.push(COMMAND_LAND_2);
        payload.push(group_mask);
        payload.extend_from_slice(&absolute_height_m.to_le_bytes());
        payload.extend_from_slice(&0f32.to_le_bytes());
        payload.push(1); // keep the current yaw
        payload.extend_from_slice(&duration_s.to_le_bytes());
        self.send(payload);
    }

    /// Stop the current high-level command and cut the motors.
    pub fn stop(&self, group_mask: u8) {
        self.send(vec![COMMAND_STOP, group_mask]);
    }

    /// Fly to a position over `duration_s` seconds. With `relative` the
    /// target is offset from the current position. Positions are in
    /// meters, yaw in radians.
    #[allow(clippy::too_many_arguments)]
    pub fn go_to(
        &self,
        x: f32,
        y: f32,
        z: f32,
        yaw: f32,
        duration_s: f32,
        relative: bool,
        group_mask: u8,
    ) {
        let mut payload = Vec::with_capacity(3 + 5 * 4);
        payload.push(COMMAND_GO_TO);
        payload.push(group_mask);
        payload.push(u8::from(relative));
        payload.extend_from_slice(&x.to_le_bytes());
        payload.extend_from_slice(&y.to_le_bytes());
        payload.extend_from_slice(&z.to_le_bytes());
        payload.extend_from_slice(&yaw.to_le_bytes());
        payload.extend_from_slice(&duration_s.to_le_bytes());
        self.send(payload);
    }

    /// Start a previously defined trajectory.
    ///
    /// `time_scale` stretches the execution: `1.0` runs at the recorded
    /// speed, larger values slower. With `relative` the trajectory is
    /// shifted to the current setpoint; `reversed` runs it back to front.
    pub fn start_trajectory(
        &self,
        trajectory_id: u8,
        time_scale: f32,
        relative: bool,
        reversed: bool,
        group_mask: u8,
    ) {
        let mut payload = Vec::with_capacity(5 + 4);
        payload.push(COMMAND_START_TRAJECTORY);
        payload.push(group_mask);
        payload.push(u8::from(relative));
        payload.push(u8::from(reversed));
        payload.push(trajectory_id);
        payload.extend_from_slice(&time_scale.to_le_bytes());
        self.send(payload);
    }

    /// Define a trajectory from data previously uploaded to trajectory
    /// memory at `offset`, made of `n_pieces` segments.
    pub fn define_trajectory(
        &self,
        trajectory_id: u8,
        offset: u32,
        n_pieces: u8,
        trajectory_type: u8,
    ) {
        let mut payload = Vec::with_capacity(5 + 4);
        payload.push(COMMAND_DEFINE_TRAJECTORY);
        payload.push(trajectory_id);
        payload.push(TRAJECTORY_LOCATION_MEM);
        payload.push(trajectory_type);
        payload.extend_from_slice(&offset.to_le_bytes());
        payload.push(n_pieces);
        self.send(payload);
    }
}
