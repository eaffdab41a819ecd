//! MAVLink command client
//!
//! Every fallible vehicle operation goes through [Commands::send]: the command is sent as
//! a `COMMAND_LONG` and the matching `COMMAND_ACK` decides the outcome. This replaces the
//! "check the result code after every call" pattern with one uniform [Result] the callers
//! short-circuit with `?`.

use std::time::Duration;

use flume::{Receiver, Sender};
use futures::lock::Mutex;
use mavlink::common::{MavCmd, MavMessage, MavModeFlag, MavResult, COMMAND_LONG_DATA};
use num_enum::IntoPrimitive;

use crate::link::{Target, WaitForMessage};
use crate::{Error, Result};

/// PX4 custom main mode, carried in the second byte of `custom_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub(crate) enum Px4MainMode {
    Manual = 1,
    Altitude = 2,
    Position = 3,
    Auto = 4,
    Acro = 5,
    Offboard = 6,
    Stabilized = 7,
}

/// PX4 auto sub mode, carried in the third byte of `custom_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub(crate) enum Px4AutoSubMode {
    None = 0,
    Takeoff = 2,
    Loiter = 3,
    Mission = 4,
    ReturnToLaunch = 5,
    Land = 6,
}

fn set_mode_params(main_mode: Px4MainMode, sub_mode: Px4AutoSubMode) -> [f32; 7] {
    let base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
    [
        f32::from(base_mode.bits()),
        f32::from(u8::from(main_mode)),
        f32::from(u8::from(sub_mode)),
        0.0,
        0.0,
        0.0,
        0.0,
    ]
}

/// Shared command channel towards the autopilot.
///
/// The ack receiver is behind an async mutex, so concurrent commands from different
/// subsystems serialize instead of stealing each other's acknowledgments.
pub(crate) struct Commands {
    uplink: Sender<MavMessage>,
    ack_downlink: Mutex<Receiver<MavMessage>>,
    target: Target,
    timeout: Duration,
}

impl Commands {
    pub fn new(uplink: Sender<MavMessage>, ack_downlink: Receiver<MavMessage>, target: Target) -> Self {
        Self {
            uplink,
            ack_downlink: Mutex::new(ack_downlink),
            target,
            timeout: crate::DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Send a command and wait for its acknowledgment.
    ///
    /// An `IN_PROGRESS` ack keeps the wait going, any other non-accepted result maps to
    /// [Error::CommandRejected]. No ack within the command timeout maps to [Error::Timeout].
    pub async fn send(&self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        let ack_downlink = self.ack_downlink.lock().await;
        ack_downlink.drain();

        let message = MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
            command,
            target_system: self.target.system_id,
            target_component: self.target.component_id,
            confirmation: 0,
        });
        self.uplink.send_async(message).await?;

        loop {
            let answer = ack_downlink
                .wait_matching(self.timeout, |m| {
                    matches!(m, MavMessage::COMMAND_ACK(ack) if ack.command == command)
                })
                .await?;

            if let MavMessage::COMMAND_ACK(ack) = answer {
                match ack.result {
                    MavResult::MAV_RESULT_ACCEPTED => return Ok(()),
                    MavResult::MAV_RESULT_IN_PROGRESS => continue,
                    other => return Err(Error::CommandRejected(other)),
                }
            }
        }
    }

    /// Switch the autopilot flight mode, PX4 custom mode encoding.
    pub async fn set_mode(&self, main_mode: Px4MainMode, sub_mode: Px4AutoSubMode) -> Result<()> {
        self.send(MavCmd::MAV_CMD_DO_SET_MODE, set_mode_params(main_mode, sub_mode))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::COMMAND_ACK_DATA;

    #[test]
    fn px4_modes_encode_to_their_wire_values() {
        assert_eq!(u8::from(Px4MainMode::Offboard), 6);
        assert_eq!(u8::from(Px4MainMode::Auto), 4);
        assert_eq!(u8::from(Px4AutoSubMode::Loiter), 3);
    }

    #[test]
    fn set_mode_params_carry_base_and_custom_mode() {
        let params = set_mode_params(Px4MainMode::Offboard, Px4AutoSubMode::None);
        assert_eq!(
            params[0],
            f32::from(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits())
        );
        assert_eq!(params[1], 6.0);
        assert_eq!(params[2], 0.0);
    }

    fn ack(command: MavCmd, result: MavResult) -> MavMessage {
        MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
            command,
            result,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn accepted_ack_completes_the_command() {
        let (uplink, uplink_rx) = flume::unbounded();
        let (ack_tx, ack_rx) = flume::unbounded();
        let commands = Commands::new(uplink, ack_rx, Target { system_id: 1, component_id: 1 });

        let responder = tokio::spawn(async move {
            let sent = uplink_rx.recv_async().await.unwrap();
            match sent {
                MavMessage::COMMAND_LONG(data) => {
                    assert_eq!(data.command, MavCmd::MAV_CMD_COMPONENT_ARM_DISARM);
                    assert_eq!(data.param1, 1.0);
                    assert_eq!(data.target_system, 1);
                }
                other => panic!("unexpected uplink message: {:?}", other),
            }
            // An ack for an unrelated command must be skipped over
            ack_tx
                .send(ack(MavCmd::MAV_CMD_NAV_LAND, MavResult::MAV_RESULT_ACCEPTED))
                .unwrap();
            ack_tx
                .send(ack(
                    MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                    MavResult::MAV_RESULT_ACCEPTED,
                ))
                .unwrap();
        });

        commands
            .send(
                MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await
            .unwrap();
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_ack_surfaces_as_command_error() {
        let (uplink, uplink_rx) = flume::unbounded();
        let (ack_tx, ack_rx) = flume::unbounded();
        let commands = Commands::new(uplink, ack_rx, Target { system_id: 1, component_id: 1 });

        let responder = tokio::spawn(async move {
            let _ = uplink_rx.recv_async().await.unwrap();
            ack_tx
                .send(ack(
                    MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                    MavResult::MAV_RESULT_DENIED,
                ))
                .unwrap();
        });

        let result = commands
            .send(
                MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await;
        assert!(matches!(
            result,
            Err(Error::CommandRejected(MavResult::MAV_RESULT_DENIED))
        ));
        responder.await.unwrap();
    }
}
