//! # Offboard subsystem
//!
//! Direct setpoint control. The autopilot expects offboard setpoints as a continuous
//! stream and falls back to its failsafe when the stream stops, so this subsystem keeps a
//! background task re-sending the latest setpoint at 20 Hz while offboard mode is active.
//!
//! A setpoint must be set before [Offboard::start], the mode switch is refused otherwise:
//!
//! ``` no_run
//! # use std::time::Duration;
//! # use mavkit::subsystems::offboard::VelocityBodyYawspeed;
//! # async fn spin(vehicle: mavkit::Vehicle) -> mavkit::Result<()> {
//! vehicle.offboard.set_velocity_body(VelocityBodyYawspeed::default());
//! vehicle.offboard.start().await?;
//!
//! vehicle.offboard.set_velocity_body(VelocityBodyYawspeed {
//!     yawspeed_deg_s: 160.0,
//!     ..Default::default()
//! });
//! tokio::time::sleep(Duration::from_secs(5)).await;
//!
//! vehicle.offboard.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use flume::Sender;
use futures::lock::Mutex;
use mavlink::common::{
    AttitudeTargetTypemask, MavFrame, MavMessage, PositionTargetTypemask,
    SET_ATTITUDE_TARGET_DATA, SET_POSITION_TARGET_LOCAL_NED_DATA,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::command::{Commands, Px4AutoSubMode, Px4MainMode};
use crate::link::Target;
use crate::{Error, Result};

const STREAM_INTERVAL: Duration = Duration::from_millis(50);

/// Velocity setpoint in the body frame with a yaw rotation rate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityBodyYawspeed {
    /// Velocity forward, in meters per second
    pub forward_m_s: f32,
    /// Velocity right, in meters per second
    pub right_m_s: f32,
    /// Velocity down, in meters per second
    pub down_m_s: f32,
    /// Yaw rotation rate, clockwise positive, in degrees per second
    pub yawspeed_deg_s: f32,
}

/// Attitude setpoint with a collective thrust value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attitude {
    /// Roll angle in degrees, positive is right side down
    pub roll_deg: f32,
    /// Pitch angle in degrees, positive is nose up
    pub pitch_deg: f32,
    /// Yaw angle in degrees, clockwise from north
    pub yaw_deg: f32,
    /// Collective thrust, range 0 to 1
    pub thrust_value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Setpoint {
    VelocityBody(VelocityBodyYawspeed),
    Attitude(Attitude),
}

/// Quaternion in MAVLink order (w, x, y, z) from intrinsic roll/pitch/yaw angles in radians.
fn quaternion_from_euler(roll: f32, pitch: f32, yaw: f32) -> [f32; 4] {
    let (sr, cr) = (roll * 0.5).sin_cos();
    let (sp, cp) = (pitch * 0.5).sin_cos();
    let (sy, cy) = (yaw * 0.5).sin_cos();

    [
        cr * cp * cy + sr * sp * sy,
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
    ]
}

fn velocity_type_mask() -> PositionTargetTypemask {
    PositionTargetTypemask::POSITION_TARGET_TYPEMASK_X_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_Y_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_Z_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_IGNORE
}

fn setpoint_message(setpoint: Setpoint, target: Target) -> MavMessage {
    match setpoint {
        Setpoint::VelocityBody(velocity) => {
            MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
                time_boot_ms: 0,
                vx: velocity.forward_m_s,
                vy: velocity.right_m_s,
                vz: velocity.down_m_s,
                yaw_rate: velocity.yawspeed_deg_s.to_radians(),
                type_mask: velocity_type_mask(),
                coordinate_frame: MavFrame::MAV_FRAME_BODY_NED,
                target_system: target.system_id,
                target_component: target.component_id,
                ..Default::default()
            })
        }
        Setpoint::Attitude(attitude) => {
            MavMessage::SET_ATTITUDE_TARGET(SET_ATTITUDE_TARGET_DATA {
                time_boot_ms: 0,
                q: quaternion_from_euler(
                    attitude.roll_deg.to_radians(),
                    attitude.pitch_deg.to_radians(),
                    attitude.yaw_deg.to_radians(),
                ),
                thrust: attitude.thrust_value,
                type_mask: AttitudeTargetTypemask::ATTITUDE_TARGET_TYPEMASK_BODY_ROLL_RATE_IGNORE
                    | AttitudeTargetTypemask::ATTITUDE_TARGET_TYPEMASK_BODY_PITCH_RATE_IGNORE
                    | AttitudeTargetTypemask::ATTITUDE_TARGET_TYPEMASK_BODY_YAW_RATE_IGNORE,
                target_system: target.system_id,
                target_component: target.component_id,
                ..Default::default()
            })
        }
    }
}

/// # Access to the offboard subsystem
///
/// See the [offboard module documentation](crate::subsystems::offboard) for more context
/// and information.
pub struct Offboard {
    uplink: Sender<MavMessage>,
    commands: Arc<Commands>,
    setpoint: watch::Sender<Option<Setpoint>>,
    streaming: Mutex<Option<JoinHandle<()>>>,
}

impl Offboard {
    pub(crate) fn new(uplink: Sender<MavMessage>, commands: Arc<Commands>) -> Self {
        let (setpoint, _) = watch::channel(None);
        Self {
            uplink,
            commands,
            setpoint,
            streaming: Mutex::new(None),
        }
    }

    /// Set the body-frame velocity setpoint.
    ///
    /// Takes effect immediately when offboard mode is active, otherwise it becomes the
    /// initial setpoint of the next [Offboard::start].
    pub fn set_velocity_body(&self, velocity: VelocityBodyYawspeed) {
        self.setpoint.send_replace(Some(Setpoint::VelocityBody(velocity)));
    }

    /// Set the attitude and thrust setpoint.
    pub fn set_attitude(&self, attitude: Attitude) {
        self.setpoint.send_replace(Some(Setpoint::Attitude(attitude)));
    }

    /// Switch the vehicle into offboard mode.
    ///
    /// Starts streaming the current setpoint, then requests the mode switch. Fails with
    /// [Error::NoSetpointSet] when no setpoint was set, the autopilot would reject the
    /// switch without a setpoint stream anyway.
    pub async fn start(&self) -> Result<()> {
        if self.setpoint.borrow().is_none() {
            return Err(Error::NoSetpointSet);
        }

        let mut streaming = self.streaming.lock().await;
        if streaming.is_some() {
            return Ok(());
        }

        let uplink = self.uplink.clone();
        let setpoint_rx = self.setpoint.subscribe();
        let target = self.commands.target();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STREAM_INTERVAL);
            loop {
                ticker.tick().await;
                let setpoint = *setpoint_rx.borrow();
                if let Some(setpoint) = setpoint {
                    if uplink
                        .send_async(setpoint_message(setpoint, target))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });

        // The autopilot wants to see a short setpoint history before accepting the switch
        tokio::time::sleep(4 * STREAM_INTERVAL).await;

        match self
            .commands
            .set_mode(Px4MainMode::Offboard, Px4AutoSubMode::None)
            .await
        {
            Ok(()) => {
                *streaming = Some(task);
                Ok(())
            }
            Err(error) => {
                task.abort();
                Err(error)
            }
        }
    }

    /// Leave offboard mode and hold position.
    ///
    /// Stops the setpoint stream and hands control back to the autopilot's loiter mode.
    pub async fn stop(&self) -> Result<()> {
        let mut streaming = self.streaming.lock().await;
        if let Some(task) = streaming.take() {
            task.abort();
        }
        self.commands
            .set_mode(Px4MainMode::Auto, Px4AutoSubMode::Loiter)
            .await
    }

    /// Whether the setpoint stream is currently running.
    pub async fn is_active(&self) -> bool {
        self.streaming.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target { system_id: 1, component_id: 1 }
    }

    #[test]
    fn velocity_setpoints_ignore_position_and_acceleration() {
        let message = setpoint_message(
            Setpoint::VelocityBody(VelocityBodyYawspeed {
                forward_m_s: 1.0,
                right_m_s: -2.0,
                down_m_s: 0.5,
                yawspeed_deg_s: 180.0,
            }),
            target(),
        );

        match message {
            MavMessage::SET_POSITION_TARGET_LOCAL_NED(data) => {
                assert_eq!(data.vx, 1.0);
                assert_eq!(data.vy, -2.0);
                assert_eq!(data.vz, 0.5);
                assert!((data.yaw_rate - std::f32::consts::PI).abs() < 1e-6);
                assert_eq!(data.coordinate_frame, MavFrame::MAV_FRAME_BODY_NED);
                let mask = data.type_mask;
                assert!(mask.contains(PositionTargetTypemask::POSITION_TARGET_TYPEMASK_X_IGNORE));
                assert!(mask.contains(PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE));
                assert!(mask.contains(PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_IGNORE));
                assert!(!mask.contains(
                    PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_RATE_IGNORE
                ));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn attitude_setpoints_ignore_body_rates() {
        let message = setpoint_message(
            Setpoint::Attitude(Attitude {
                roll_deg: 30.0,
                thrust_value: 0.6,
                ..Default::default()
            }),
            target(),
        );

        match message {
            MavMessage::SET_ATTITUDE_TARGET(data) => {
                assert_eq!(data.thrust, 0.6);
                assert!(data.type_mask.contains(
                    AttitudeTargetTypemask::ATTITUDE_TARGET_TYPEMASK_BODY_ROLL_RATE_IGNORE
                ));
                // 30 degree roll quaternion
                assert!((data.q[0] - (15.0_f32.to_radians()).cos()).abs() < 1e-6);
                assert!((data.q[1] - (15.0_f32.to_radians()).sin()).abs() < 1e-6);
                assert!(data.q[2].abs() < 1e-6);
                assert!(data.q[3].abs() < 1e-6);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn zero_attitude_maps_to_identity_quaternion() {
        let q = quaternion_from_euler(0.0, 0.0, 0.0);
        assert_eq!(q, [1.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn start_without_setpoint_is_refused() {
        let (uplink, _uplink_rx) = flume::unbounded();
        let (_ack_tx, ack_rx) = flume::unbounded();
        let commands = Arc::new(Commands::new(uplink.clone(), ack_rx, target()));
        let offboard = Offboard::new(uplink, commands);

        let result = offboard.start().await;
        assert!(matches!(result, Err(Error::NoSetpointSet)));
        assert!(!offboard.is_active().await);
    }
}
