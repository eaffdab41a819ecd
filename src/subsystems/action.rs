//! # Action subsystem
//!
//! Simple vehicle actions: arming, taking off, landing and returning to launch. Each
//! method sends one MAVLink command and resolves once the autopilot acknowledged it, so
//! a failed call means the autopilot actually refused the action, not just that the
//! message left the ground station.
//!
//! ``` no_run
//! # async fn fly(vehicle: mavkit::Vehicle) -> mavkit::Result<()> {
//! vehicle.action.set_takeoff_altitude(10.0);
//! vehicle.action.arm().await?;
//! vehicle.action.takeoff().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::Mutex;

use mavlink::common::MavCmd;
use tokio::sync::watch;

use crate::command::Commands;
use crate::subsystems::telemetry::Position;
use crate::{Error, Result};

/// # Access to the action subsystem
///
/// See the [action module documentation](crate::subsystems::action) for more context and
/// information.
pub struct Action {
    commands: Arc<Commands>,
    position: watch::Receiver<Option<Position>>,
    takeoff_altitude_m: Mutex<f32>,
}

impl Action {
    pub(crate) fn new(commands: Arc<Commands>, position: watch::Receiver<Option<Position>>) -> Self {
        Self {
            commands,
            position,
            // NaN lets the firmware fall back to its configured default altitude
            takeoff_altitude_m: Mutex::new(f32::NAN),
        }
    }

    /// Arm the vehicle. The autopilot refuses this while pre-flight checks fail, see
    /// [Telemetry::health_all_ok](crate::subsystems::telemetry::Telemetry::health_all_ok).
    pub async fn arm(&self) -> Result<()> {
        self.commands
            .send(
                MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await
    }

    /// Disarm the vehicle. Refused while in the air.
    pub async fn disarm(&self) -> Result<()> {
        self.commands
            .send(
                MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await
    }

    /// Take off from the current position to the takeoff altitude.
    ///
    /// The takeoff command carries the target altitude above mean sea level. When a
    /// takeoff altitude is set, it is converted using the current ground altitude from
    /// telemetry, which requires a position to be known ([Error::PositionUnknown]
    /// otherwise, see [Telemetry::wait_position](crate::subsystems::telemetry::Telemetry::wait_position)).
    /// Without a set takeoff altitude the firmware default applies.
    pub async fn takeoff(&self) -> Result<()> {
        let altitude_m = *self.takeoff_altitude_m.lock().unwrap();
        let amsl_altitude_m = if altitude_m.is_nan() {
            f32::NAN
        } else {
            let position = (*self.position.borrow()).ok_or(Error::PositionUnknown)?;
            position.absolute_altitude_m - position.relative_altitude_m + altitude_m
        };

        self.commands
            .send(
                MavCmd::MAV_CMD_NAV_TAKEOFF,
                [
                    f32::NAN,
                    0.0,
                    0.0,
                    f32::NAN,
                    f32::NAN,
                    f32::NAN,
                    amsl_altitude_m,
                ],
            )
            .await
    }

    /// Land at the current position.
    pub async fn land(&self) -> Result<()> {
        self.commands
            .send(
                MavCmd::MAV_CMD_NAV_LAND,
                [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, f32::NAN],
            )
            .await
    }

    /// Fly back to the launch position and land there.
    pub async fn return_to_launch(&self) -> Result<()> {
        self.commands
            .send(
                MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH,
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await
    }

    /// Set the altitude above the ground used by following [Action::takeoff] calls.
    pub fn set_takeoff_altitude(&self, altitude_m: f32) {
        *self.takeoff_altitude_m.lock().unwrap() = altitude_m;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Target;
    use mavlink::common::{MavMessage, MavResult, COMMAND_ACK_DATA};

    struct Harness {
        action: Action,
        position_tx: watch::Sender<Option<Position>>,
        uplink_rx: flume::Receiver<MavMessage>,
        ack_tx: flume::Sender<MavMessage>,
    }

    fn harness() -> Harness {
        let (uplink, uplink_rx) = flume::unbounded();
        let (ack_tx, ack_rx) = flume::unbounded();
        let (position_tx, position_rx) = watch::channel(None);
        let commands = Arc::new(Commands::new(
            uplink,
            ack_rx,
            Target { system_id: 1, component_id: 1 },
        ));
        let action = Action::new(commands, position_rx);
        Harness { action, position_tx, uplink_rx, ack_tx }
    }

    fn accept_all(h: &Harness) -> tokio::task::JoinHandle<MavMessage> {
        let uplink_rx = h.uplink_rx.clone();
        let ack_tx = h.ack_tx.clone();
        tokio::spawn(async move {
            let sent = uplink_rx.recv_async().await.unwrap();
            if let MavMessage::COMMAND_LONG(data) = &sent {
                ack_tx
                    .send(MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
                        command: data.command,
                        result: MavResult::MAV_RESULT_ACCEPTED,
                        ..Default::default()
                    }))
                    .unwrap();
            }
            sent
        })
    }

    #[tokio::test]
    async fn takeoff_altitude_converts_to_above_mean_sea_level() {
        let h = harness();
        h.position_tx
            .send(Some(Position {
                latitude_deg: 37.0,
                longitude_deg: 127.0,
                absolute_altitude_m: 500.0,
                relative_altitude_m: 0.0,
            }))
            .unwrap();
        h.action.set_takeoff_altitude(10.0);

        let autopilot = accept_all(&h);
        h.action.takeoff().await.unwrap();

        match autopilot.await.unwrap() {
            MavMessage::COMMAND_LONG(data) => {
                assert_eq!(data.command, MavCmd::MAV_CMD_NAV_TAKEOFF);
                assert_eq!(data.param7, 510.0);
            }
            other => panic!("unexpected uplink message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn default_takeoff_leaves_the_altitude_to_the_firmware() {
        let h = harness();
        // No position known, no altitude set: the command must still go out with NaN
        let autopilot = accept_all(&h);
        h.action.takeoff().await.unwrap();

        match autopilot.await.unwrap() {
            MavMessage::COMMAND_LONG(data) => assert!(data.param7.is_nan()),
            other => panic!("unexpected uplink message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn set_altitude_without_a_position_is_refused() {
        let h = harness();
        h.action.set_takeoff_altitude(10.0);

        let result = h.action.takeoff().await;
        assert!(matches!(result, Err(Error::PositionUnknown)));
        assert!(h.uplink_rx.is_empty());
    }
}
