//! Link pump and downlink message dispatch
//!
//! The [mavlink] connection API is blocking, so the lib drives it from two plain threads:
//! a reader that fans incoming messages out to per-class flume channels and a writer that
//! drains the uplink queue and stamps outgoing headers. Flume channels bridge the thread
//! side and the async side of the lib.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flume::{Receiver, Sender};
use mavlink::common::{
    MavAutopilot, MavMessage, MavState, MavType, HEARTBEAT_DATA,
};
use mavlink::{MavConnection, MavHeader};

use crate::{Error, Result};

/// Identity stamped on every message this lib sends.
pub(crate) const LOCAL_SYSTEM_ID: u8 = 245;
pub(crate) const LOCAL_COMPONENT_ID: u8 = 190; // MAV_COMP_ID_MISSIONPLANNER

pub(crate) type Connection = Arc<Box<dyn MavConnection<MavMessage> + Send + Sync>>;

/// Identity of the discovered autopilot on the link.
///
/// Used as destination for all commands and mission items. The target is discovered from
/// the first heartbeat received when connecting, see [Vehicle::connect](crate::Vehicle::connect).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// MAVLink system id of the autopilot
    pub system_id: u8,
    /// MAVLink component id of the autopilot
    pub component_id: u8,
}

/// Downlink routing classes. Each subsystem consumes one class through its own channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum MessageClass {
    CommandAck,
    MissionTransfer,
    MissionProgress,
    Telemetry,
}

fn classify(message: &MavMessage) -> Option<MessageClass> {
    match message {
        MavMessage::COMMAND_ACK(_) => Some(MessageClass::CommandAck),
        MavMessage::MISSION_REQUEST(_)
        | MavMessage::MISSION_REQUEST_INT(_)
        | MavMessage::MISSION_ACK(_) => Some(MessageClass::MissionTransfer),
        MavMessage::MISSION_CURRENT(_) | MavMessage::MISSION_ITEM_REACHED(_) => {
            Some(MessageClass::MissionProgress)
        }
        MavMessage::HEARTBEAT(_)
        | MavMessage::GLOBAL_POSITION_INT(_)
        | MavMessage::SYS_STATUS(_)
        | MavMessage::EXTENDED_SYS_STATE(_)
        | MavMessage::HOME_POSITION(_) => Some(MessageClass::Telemetry),
        _ => None,
    }
}

pub(crate) struct MavDispatch {
    connection: Connection,
    class_channels: BTreeMap<MessageClass, Sender<MavMessage>>,
    discovery: Sender<Target>,
    discovery_rx: Option<Receiver<Target>>,
    disconnect: Arc<AtomicBool>,
}

impl MavDispatch {
    pub fn new(connection: Connection, disconnect: Arc<AtomicBool>) -> Self {
        let (discovery, discovery_rx) = flume::bounded(1);
        MavDispatch {
            connection,
            class_channels: BTreeMap::new(),
            discovery,
            discovery_rx: Some(discovery_rx),
            disconnect,
        }
    }

    #[allow(clippy::map_entry)]
    pub fn get_class_receiver(&mut self, class: MessageClass) -> Option<Receiver<MavMessage>> {
        if self.class_channels.contains_key(&class) {
            None
        } else {
            let (tx, rx) = flume::unbounded();
            self.class_channels.insert(class, tx);
            Some(rx)
        }
    }

    /// Single-shot channel delivering the autopilot identity on its first heartbeat.
    pub fn take_discovery(&mut self) -> Receiver<Target> {
        self.discovery_rx.take().expect("discovery receiver already taken")
    }

    /// Start the downlink reader thread.
    ///
    /// The thread stops when the disconnect flag is set and the link delivers one more
    /// message, or when the link errors out. A link blocked in `recv()` with no traffic
    /// only notices the flag on the next message.
    pub fn run(self) -> std::thread::JoinHandle<()> {
        let mut discovered = false;
        std::thread::spawn(move || {
            while !self.disconnect.load(Relaxed) {
                let (header, message) = match self.connection.recv() {
                    Ok(incoming) => incoming,
                    Err(_) => return,
                };

                if header.system_id == LOCAL_SYSTEM_ID {
                    continue;
                }

                if !discovered {
                    if let MavMessage::HEARTBEAT(beat) = &message {
                        if beat.mavtype != MavType::MAV_TYPE_GCS {
                            discovered = true;
                            let _ = self.discovery.send(Target {
                                system_id: header.system_id,
                                component_id: header.component_id,
                            });
                        }
                    }
                }

                if let Some(class) = classify(&message) {
                    if let Some(channel) = self.class_channels.get(&class) {
                        let _ = channel.send(message);
                    }
                }
            }
        })
    }
}

/// Start the uplink writer thread and return the queue feeding it.
///
/// Outgoing messages get a GCS header with a running sequence number. The thread quits
/// when the disconnect flag is set, the queue closes or the link errors out.
pub(crate) fn spawn_uplink(connection: Connection, disconnect: Arc<AtomicBool>) -> Sender<MavMessage> {
    let (uplink, rx) = flume::unbounded::<MavMessage>();

    std::thread::spawn(move || {
        let mut sequence: u8 = 0;
        while !disconnect.load(Relaxed) {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(message) => {
                    let header = MavHeader {
                        system_id: LOCAL_SYSTEM_ID,
                        component_id: LOCAL_COMPONENT_ID,
                        sequence,
                    };
                    sequence = sequence.wrapping_add(1);
                    if connection.send(&header, &message).is_err() {
                        return;
                    }
                }
                Err(flume::RecvTimeoutError::Timeout) => (),
                Err(flume::RecvTimeoutError::Disconnected) => return,
            }
        }
    });

    uplink
}

/// Heartbeat identifying this lib as a ground station.
pub(crate) fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
        ..Default::default()
    })
}

#[async_trait]
pub(crate) trait WaitForMessage {
    async fn wait_matching<F>(&self, timeout: Duration, matches: F) -> Result<MavMessage>
    where
        F: Fn(&MavMessage) -> bool + Send + Sync;
}

#[async_trait]
impl WaitForMessage for Receiver<MavMessage> {
    async fn wait_matching<F>(&self, timeout: Duration, matches: F) -> Result<MavMessage>
    where
        F: Fn(&MavMessage) -> bool + Send + Sync,
    {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let message = tokio::time::timeout_at(deadline, self.recv_async())
                .await
                .map_err(|_| Error::Timeout)??;

            if matches(&message) {
                return Ok(message);
            }
        }
    }
}
