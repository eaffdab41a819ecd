//! Vehicle connection handling
//!
//! Connecting opens the MAVLink link, starts the link pump threads, waits for the
//! autopilot to announce itself with a heartbeat and wires up the subsystems. The
//! resulting [Vehicle] is the root object of the lib.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use futures::lock::Mutex;
use mavlink::common::MavMessage;
use tokio::task::JoinHandle;

use crate::command::Commands;
use crate::link::{self, MavDispatch, MessageClass, Target};
use crate::subsystems::action::Action;
use crate::subsystems::mission::Mission;
use crate::subsystems::offboard::Offboard;
use crate::subsystems::telemetry::Telemetry;
use crate::{Error, Result};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// A connected MAVLink vehicle
///
/// This struct is the core of the lib: it maintains the link to the autopilot and exposes
/// the subsystems as public fields. See the [crate documentation](crate) for an overview.
pub struct Vehicle {
    /// Action subsystem, see the [action](crate::subsystems::action) module
    pub action: Action,
    /// Telemetry subsystem, see the [telemetry](crate::subsystems::telemetry) module
    pub telemetry: Telemetry,
    /// Mission subsystem, see the [mission](crate::subsystems::mission) module
    pub mission: Mission,
    /// Offboard subsystem, see the [offboard](crate::subsystems::offboard) module
    pub offboard: Offboard,
    target: Target,
    disconnect: Arc<AtomicBool>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl Vehicle {
    /// Connect a vehicle with the [default discovery timeout](crate::DEFAULT_DISCOVERY_TIMEOUT).
    ///
    /// The address format is the one of [mavlink::connect], for example
    /// `udpin:0.0.0.0:14540`, `udpout:127.0.0.1:14540`, `tcpout:192.168.1.1:5760` or
    /// `serial:/dev/ttyACM0:57600`.
    pub async fn connect(address: &str) -> Result<Vehicle> {
        Self::connect_with_timeout(address, crate::DEFAULT_DISCOVERY_TIMEOUT).await
    }

    /// Connect a vehicle, waiting at most `discovery_timeout` for its first heartbeat.
    pub async fn connect_with_timeout(
        address: &str,
        discovery_timeout: Duration,
    ) -> Result<Vehicle> {
        let address = address.to_owned();
        let connection = tokio::task::spawn_blocking(move || {
            mavlink::connect::<MavMessage>(&address)
        })
        .await
        .map_err(|e| Error::SystemError(format!("connect task failed: {}", e)))?
        .map_err(|e| Error::ConnectionError(e.to_string()))?;
        let connection: link::Connection = Arc::new(connection);

        let disconnect = Arc::new(AtomicBool::new(false));

        let mut dispatch = MavDispatch::new(connection.clone(), disconnect.clone());
        let ack_downlink = dispatch.get_class_receiver(MessageClass::CommandAck);
        let transfer_downlink = dispatch.get_class_receiver(MessageClass::MissionTransfer);
        let progress_downlink = dispatch.get_class_receiver(MessageClass::MissionProgress);
        let telemetry_downlink = dispatch.get_class_receiver(MessageClass::Telemetry);
        let (ack_downlink, transfer_downlink, progress_downlink, telemetry_downlink) =
            match (ack_downlink, transfer_downlink, progress_downlink, telemetry_downlink) {
                (Some(a), Some(t), Some(p), Some(m)) => (a, t, p, m),
                _ => {
                    return Err(Error::SystemError(
                        "downlink channel already registered".to_owned(),
                    ))
                }
            };
        let discovery = dispatch.take_discovery();
        dispatch.run();

        let uplink = link::spawn_uplink(connection, disconnect.clone());

        // Heartbeat at 1Hz so the autopilot sees an active ground station
        let heartbeat_uplink = uplink.clone();
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if heartbeat_uplink.send_async(link::gcs_heartbeat()).await.is_err() {
                    return;
                }
            }
        });

        let discovered = tokio::time::timeout(discovery_timeout, discovery.recv_async()).await;
        let target = match discovered {
            Ok(Ok(target)) => target,
            failed => {
                // No Vehicle exists to disconnect, stop the link threads here
                disconnect.store(true, Relaxed);
                heartbeat_task.abort();
                drop(uplink);
                return Err(match failed {
                    Ok(Err(_)) => Error::LinkLost,
                    _ => Error::Timeout,
                });
            }
        };
        log::info!(
            "Discovered autopilot, system id {} component id {}",
            target.system_id,
            target.component_id
        );

        let commands = Arc::new(Commands::new(uplink.clone(), ack_downlink, target));

        let telemetry = Telemetry::new(telemetry_downlink, commands.clone());
        let action = Action::new(commands.clone(), telemetry.position_watch());

        Ok(Vehicle {
            action,
            telemetry,
            mission: Mission::new(
                uplink.clone(),
                transfer_downlink,
                progress_downlink,
                commands.clone(),
            ),
            offboard: Offboard::new(uplink, commands),
            target,
            disconnect,
            heartbeat_task: Mutex::new(Some(heartbeat_task)),
        })
    }

    /// Identity of the connected autopilot.
    pub fn target(&self) -> Target {
        self.target
    }

    /// Disconnect the vehicle.
    ///
    /// Stops the heartbeat and signals the link threads to quit. A reader blocked on a
    /// quiet link only notices when the next message arrives, the thread is not joined.
    pub async fn disconnect(&self) {
        log::info!("Disconnecting the vehicle");
        self.disconnect.store(true, Relaxed);
        if let Some(task) = self.heartbeat_task.lock().await.take() {
            task.abort();
        }
    }
}

impl Drop for Vehicle {
    fn drop(&mut self) {
        self.disconnect.store(true, Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_address_scheme_is_a_connection_error() {
        let result = Vehicle::connect_with_timeout("carrier-pigeon:localhost", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::ConnectionError(_))));
    }

    #[tokio::test]
    async fn failed_discovery_stops_heartbeating_the_dead_link() {
        // A peer that never answers, so discovery times out
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = format!("udpout:127.0.0.1:{}", peer.local_addr().unwrap().port());

        let result = Vehicle::connect_with_timeout(&address, Duration::from_millis(300)).await;
        assert!(matches!(result, Err(Error::Timeout)));

        // Drain the heartbeats sent while connecting, then the link must stay quiet
        let mut buffer = [0u8; 1024];
        peer.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
        while peer.recv(&mut buffer).is_ok() {}
        peer.set_read_timeout(Some(Duration::from_millis(1500))).unwrap();
        assert!(peer.recv(&mut buffer).is_err());
    }
}
