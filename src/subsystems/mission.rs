//! # Mission subsystem
//!
//! Upload of scripted waypoint missions and tracking of their execution. A [MissionPlan]
//! is an ordered sequence of [MissionItem] waypoints owned by the caller until it is
//! handed to [Mission::upload], which runs the MAVLink mission transfer handshake
//! (count, item requests, final ack). Every handshake step is timeout guarded, a vehicle
//! that stops answering mid-transfer surfaces as [Error::Timeout].
//!
//! ``` no_run
//! # use std::time::Duration;
//! # async fn fly(vehicle: mavkit::Vehicle, plan: mavkit::subsystems::mission::MissionPlan) -> mavkit::Result<()> {
//! vehicle.mission.upload(&plan).await?;
//! vehicle.action.arm().await?;
//! vehicle.mission.start().await?;
//! vehicle.mission.wait_finished(Duration::from_secs(1800)).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU16, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use futures::lock::Mutex;
use mavlink::common::{
    MavCmd, MavFrame, MavMessage, MavMissionResult, MISSION_COUNT_DATA, MISSION_ITEM_INT_DATA,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::command::Commands;
use crate::link::{Target, WaitForMessage};
use crate::{Error, Result};

/// A single mission waypoint.
///
/// Immutable once created, appended in generation order to a [MissionPlan].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissionItem {
    /// Latitude in degrees, range -90 to +90
    pub latitude_deg: f64,
    /// Longitude in degrees, range -180 to +180
    pub longitude_deg: f64,
    /// Altitude above the takeoff position in meters
    pub relative_altitude_m: f32,
    /// Ground speed to fly this leg with, in meters per second
    pub speed_m_s: f32,
    /// Pass through the waypoint without stopping at it
    pub is_fly_through: bool,
}

/// Ordered sequence of waypoints forming a mission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissionPlan {
    /// The waypoints in flight order
    pub mission_items: Vec<MissionItem>,
}

/// Execution state of the uploaded mission, in [MissionPlan] waypoint units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MissionProgress {
    /// Index of the plan waypoint currently being flown
    pub current: u16,
    /// Number of waypoints in the uploaded plan
    pub total: u16,
}

// Hold a moment at waypoints the vehicle should stop at
const STOP_HOLD_TIME_S: f32 = 1.0;

/// Translate a plan into the items sent over the wire.
///
/// The plan's speed is turned into one leading `DO_CHANGE_SPEED` item, every waypoint
/// becomes a `NAV_WAYPOINT` in the global relative-altitude frame.
fn build_transfer_items(plan: &MissionPlan, target: Target) -> Vec<MISSION_ITEM_INT_DATA> {
    let mut items = Vec::with_capacity(plan.mission_items.len() + 1);

    let speed_m_s = plan
        .mission_items
        .first()
        .map(|item| item.speed_m_s)
        .unwrap_or(0.0);
    items.push(MISSION_ITEM_INT_DATA {
        param1: 1.0, // ground speed
        param2: speed_m_s,
        param3: -1.0, // no throttle change
        param4: 0.0,
        x: 0,
        y: 0,
        z: 0.0,
        seq: 0,
        command: MavCmd::MAV_CMD_DO_CHANGE_SPEED,
        target_system: target.system_id,
        target_component: target.component_id,
        frame: MavFrame::MAV_FRAME_MISSION,
        current: 1,
        autocontinue: 1,
        ..Default::default()
    });

    for (index, waypoint) in plan.mission_items.iter().enumerate() {
        items.push(MISSION_ITEM_INT_DATA {
            param1: if waypoint.is_fly_through { 0.0 } else { STOP_HOLD_TIME_S },
            param2: 0.0, // firmware default acceptance radius
            param3: 0.0,
            param4: f32::NAN, // yaw follows the path
            x: (waypoint.latitude_deg * 1e7).round() as i32,
            y: (waypoint.longitude_deg * 1e7).round() as i32,
            z: waypoint.relative_altitude_m,
            seq: (index + 1) as u16,
            command: MavCmd::MAV_CMD_NAV_WAYPOINT,
            target_system: target.system_id,
            target_component: target.component_id,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
            current: 0,
            autocontinue: 1,
            ..Default::default()
        });
    }

    items
}

struct ProgressShared {
    progress_tx: watch::Sender<MissionProgress>,
    finished_tx: watch::Sender<bool>,
    total: AtomicU16,
}

/// # Access to the mission subsystem
///
/// See the [mission module documentation](crate::subsystems::mission) for more context and
/// information.
pub struct Mission {
    uplink: Sender<MavMessage>,
    commands: Arc<Commands>,
    transfer_downlink: Mutex<Receiver<MavMessage>>,
    shared: Arc<ProgressShared>,
    progress: watch::Receiver<MissionProgress>,
    finished: watch::Receiver<bool>,
    _progress_task: JoinHandle<()>,
}

impl Mission {
    pub(crate) fn new(
        uplink: Sender<MavMessage>,
        transfer_downlink: Receiver<MavMessage>,
        progress_downlink: Receiver<MavMessage>,
        commands: Arc<Commands>,
    ) -> Self {
        let (progress_tx, progress) = watch::channel(MissionProgress::default());
        let (finished_tx, finished) = watch::channel(false);
        let shared = Arc::new(ProgressShared {
            progress_tx,
            finished_tx,
            total: AtomicU16::new(0),
        });

        let task_shared = shared.clone();
        let progress_task = tokio::spawn(async move {
            while let Ok(message) = progress_downlink.recv_async().await {
                let total = task_shared.total.load(Relaxed);
                match message {
                    MavMessage::MISSION_CURRENT(data) => {
                        // Transfer item 0 is the synthetic speed item, map back to plan units
                        let _ = task_shared.progress_tx.send(MissionProgress {
                            current: data.seq.saturating_sub(1),
                            total,
                        });
                    }
                    MavMessage::MISSION_ITEM_REACHED(data) => {
                        // The last waypoint carries transfer sequence `total`
                        if total > 0 && data.seq == total {
                            let _ = task_shared.finished_tx.send(true);
                        }
                    }
                    _ => (),
                }
            }
        });

        Self {
            uplink,
            commands,
            transfer_downlink: Mutex::new(transfer_downlink),
            shared,
            progress,
            finished,
            _progress_task: progress_task,
        }
    }

    /// Upload a mission plan to the vehicle.
    ///
    /// Replaces any mission stored on the vehicle. The transfer follows the autopilot's
    /// item requests, out-of-order requests for a known item are answered as asked.
    pub async fn upload(&self, plan: &MissionPlan) -> Result<()> {
        if plan.mission_items.is_empty() {
            return Err(Error::InvalidArgument("mission plan is empty".to_string()));
        }

        let target = self.commands.target();
        let items = build_transfer_items(plan, target);
        let count = items.len() as u16;

        let transfer_downlink = self.transfer_downlink.lock().await;
        transfer_downlink.drain();

        // New upload invalidates previous progress
        self.shared.total.store(0, Relaxed);
        let _ = self.shared.finished_tx.send(false);
        let _ = self.shared.progress_tx.send(MissionProgress::default());

        self.uplink
            .send_async(MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
                count,
                target_system: target.system_id,
                target_component: target.component_id,
                ..Default::default()
            }))
            .await?;

        loop {
            let answer = transfer_downlink
                .wait_matching(crate::DEFAULT_COMMAND_TIMEOUT, |m| {
                    matches!(
                        m,
                        MavMessage::MISSION_REQUEST(_)
                            | MavMessage::MISSION_REQUEST_INT(_)
                            | MavMessage::MISSION_ACK(_)
                    )
                })
                .await?;

            let requested = match answer {
                MavMessage::MISSION_REQUEST(request) => request.seq,
                MavMessage::MISSION_REQUEST_INT(request) => request.seq,
                MavMessage::MISSION_ACK(ack) => {
                    return match ack.mavtype {
                        MavMissionResult::MAV_MISSION_ACCEPTED => {
                            let waypoints = plan.mission_items.len() as u16;
                            self.shared.total.store(waypoints, Relaxed);
                            let _ = self
                                .shared
                                .progress_tx
                                .send(MissionProgress { current: 0, total: waypoints });
                            log::info!("Mission with {} waypoints uploaded", waypoints);
                            Ok(())
                        }
                        refused => Err(Error::MissionRefused(refused)),
                    };
                }
                _ => continue,
            };

            let item = items.get(requested as usize).ok_or_else(|| {
                Error::MissionError(format!(
                    "vehicle requested item {} of {}",
                    requested, count
                ))
            })?;
            self.uplink
                .send_async(MavMessage::MISSION_ITEM_INT(item.clone()))
                .await?;
        }
    }

    /// Start flying the uploaded mission.
    pub async fn start(&self) -> Result<()> {
        let _ = self.shared.finished_tx.send(false);
        self.commands
            .send(
                MavCmd::MAV_CMD_MISSION_START,
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await
    }

    /// Execution progress of the uploaded mission.
    pub fn progress(&self) -> MissionProgress {
        *self.progress.borrow()
    }

    /// Watch channel following the execution progress, one update per current-item change.
    pub fn progress_updates(&self) -> watch::Receiver<MissionProgress> {
        self.progress.clone()
    }

    /// Whether the last waypoint of the uploaded mission was reached.
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait until the last waypoint of the uploaded mission is reached.
    pub async fn wait_finished(&self, timeout: Duration) -> Result<()> {
        let mut finished = self.finished.clone();
        tokio::time::timeout(timeout, async move {
            loop {
                if *finished.borrow() {
                    return Ok(());
                }
                finished.changed().await.map_err(|_| Error::LinkLost)?;
            }
        })
        .await
        .map_err(|_| Error::Timeout)?
    }
}
