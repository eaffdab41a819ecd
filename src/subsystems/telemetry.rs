//! # Telemetry subsystem
//!
//! Decodes the vehicle state streams into typed snapshots. The latest value of each state
//! is held in a single-slot watch channel, so readers always observe a consistent update
//! and never race the decoding task. Position updates can additionally be consumed as a
//! stream by any number of subscribers.
//!
//! Waiting for a state transition is done with the `wait_*` methods which all take an
//! explicit timeout, a vehicle link gone silent surfaces as [Error::Timeout] or
//! [Error::LinkLost] instead of hanging forever:
//!
//! ``` no_run
//! # use std::time::Duration;
//! # async fn monitor(vehicle: mavkit::Vehicle) -> mavkit::Result<()> {
//! vehicle.telemetry.set_rate_position(1.0).await?;
//! vehicle.telemetry.wait_until_healthy(Duration::from_secs(60)).await?;
//! let home = vehicle.telemetry.wait_position(Duration::from_secs(10)).await?;
//! println!("Home: {} {}", home.latitude_deg, home.longitude_deg);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_broadcast::InactiveReceiver;
use flume::Receiver;
use mavlink::common::{
    MavCmd, MavLandedState, MavMessage, MavModeFlag, MavSysStatusSensor,
    GLOBAL_POSITION_INT_DATA, SYS_STATUS_DATA,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::command::Commands;
use crate::{Error, Result};

// MAVLink message ids used with MAV_CMD_SET_MESSAGE_INTERVAL
const GLOBAL_POSITION_INT_ID: u32 = 33;
const EXTENDED_SYS_STATE_ID: u32 = 245;

/// Vehicle position in geodetic coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Latitude in degrees, range -90 to +90
    pub latitude_deg: f64,
    /// Longitude in degrees, range -180 to +180
    pub longitude_deg: f64,
    /// Altitude above mean sea level in meters
    pub absolute_altitude_m: f32,
    /// Altitude above the takeoff position in meters
    pub relative_altitude_m: f32,
}

/// Health of the sensors the autopilot needs before it accepts arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Health {
    /// Gyroscope present, enabled and healthy
    pub gyrometer_ok: bool,
    /// Accelerometer present, enabled and healthy
    pub accelerometer_ok: bool,
    /// Magnetometer present, enabled and healthy
    pub magnetometer_ok: bool,
    /// Global position estimate available
    pub global_position_ok: bool,
}

impl Health {
    /// All monitored health flags are good.
    pub fn all_ok(&self) -> bool {
        self.gyrometer_ok && self.accelerometer_ok && self.magnetometer_ok && self.global_position_ok
    }
}

fn position_from(data: &GLOBAL_POSITION_INT_DATA) -> Position {
    Position {
        latitude_deg: f64::from(data.lat) / 1e7,
        longitude_deg: f64::from(data.lon) / 1e7,
        absolute_altitude_m: data.alt as f32 / 1000.0,
        relative_altitude_m: data.relative_alt as f32 / 1000.0,
    }
}

fn health_from(data: &SYS_STATUS_DATA) -> Health {
    let ok = |sensor: MavSysStatusSensor| {
        data.onboard_control_sensors_present.contains(sensor)
            && data.onboard_control_sensors_enabled.contains(sensor)
            && data.onboard_control_sensors_health.contains(sensor)
    };

    Health {
        gyrometer_ok: ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO),
        accelerometer_ok: ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL),
        magnetometer_ok: ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG),
        global_position_ok: ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_GPS),
    }
}

fn in_air_from(landed_state: MavLandedState) -> bool {
    !matches!(
        landed_state,
        MavLandedState::MAV_LANDED_STATE_ON_GROUND | MavLandedState::MAV_LANDED_STATE_UNDEFINED
    )
}

/// # Access to the telemetry subsystem
///
/// See the [telemetry module documentation](crate::subsystems::telemetry) for more context
/// and information.
pub struct Telemetry {
    commands: Arc<Commands>,
    position: watch::Receiver<Option<Position>>,
    armed: watch::Receiver<bool>,
    in_air: watch::Receiver<bool>,
    health: watch::Receiver<Health>,
    position_updates: InactiveReceiver<Position>,
    _decode_task: JoinHandle<()>,
}

impl Telemetry {
    pub(crate) fn new(downlink: Receiver<MavMessage>, commands: Arc<Commands>) -> Self {
        let (position_tx, position) = watch::channel(None);
        let (armed_tx, armed) = watch::channel(false);
        let (in_air_tx, in_air) = watch::channel(false);
        let (health_tx, health) = watch::channel(Health::default());

        let (mut updates_tx, updates_rx) = async_broadcast::broadcast(16);
        updates_tx.set_overflow(true);
        let position_updates = updates_rx.deactivate();

        let decode_task = tokio::spawn(async move {
            while let Ok(message) = downlink.recv_async().await {
                match message {
                    MavMessage::GLOBAL_POSITION_INT(data) => {
                        let update = position_from(&data);
                        let _ = position_tx.send(Some(update));
                        let _ = updates_tx.try_broadcast(update);
                    }
                    MavMessage::HEARTBEAT(data) => {
                        let _ = armed_tx.send(
                            data.base_mode
                                .contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED),
                        );
                    }
                    MavMessage::EXTENDED_SYS_STATE(data) => {
                        let _ = in_air_tx.send(in_air_from(data.landed_state));
                    }
                    MavMessage::SYS_STATUS(data) => {
                        let _ = health_tx.send(health_from(&data));
                    }
                    _ => (),
                }
            }
        });

        Self {
            commands,
            position,
            armed,
            in_air,
            health,
            position_updates,
            _decode_task: decode_task,
        }
    }

    /// Request the position stream at the given rate in Hertz.
    pub async fn set_rate_position(&self, rate_hz: f64) -> Result<()> {
        self.set_message_interval(GLOBAL_POSITION_INT_ID, rate_hz).await
    }

    /// Request the landed-state stream (feeding [Telemetry::in_air]) at the given rate in Hertz.
    pub async fn set_rate_landed_state(&self, rate_hz: f64) -> Result<()> {
        self.set_message_interval(EXTENDED_SYS_STATE_ID, rate_hz).await
    }

    async fn set_message_interval(&self, message_id: u32, rate_hz: f64) -> Result<()> {
        if !(rate_hz > 0.0 && rate_hz.is_finite()) {
            return Err(Error::InvalidArgument(format!(
                "telemetry rate must be positive, got {}",
                rate_hz
            )));
        }
        let interval_us = (1_000_000.0 / rate_hz) as f32;
        self.commands
            .send(
                MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
                [message_id as f32, interval_us, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await
    }

    /// Latest known position, `None` until the first position message arrived.
    pub fn position(&self) -> Option<Position> {
        *self.position.borrow()
    }

    pub(crate) fn position_watch(&self) -> watch::Receiver<Option<Position>> {
        self.position.clone()
    }

    /// Whether the vehicle motors are armed.
    pub fn armed(&self) -> bool {
        *self.armed.borrow()
    }

    /// Whether the vehicle is currently airborne.
    pub fn in_air(&self) -> bool {
        *self.in_air.borrow()
    }

    /// Latest sensor health snapshot.
    pub fn health(&self) -> Health {
        *self.health.borrow()
    }

    /// All health checks needed for arming are good.
    pub fn health_all_ok(&self) -> bool {
        self.health().all_ok()
    }

    /// Subscribe to position updates as a stream.
    ///
    /// Every subscriber gets its own copy of each update. Slow subscribers lose the oldest
    /// updates instead of stalling the decoder.
    pub fn position_updates(&self) -> async_broadcast::Receiver<Position> {
        self.position_updates.activate_cloned()
    }

    /// Wait until a position is known and return it.
    pub async fn wait_position(&self, timeout: Duration) -> Result<Position> {
        let mut rx = self.position.clone();
        tokio::time::timeout(timeout, async move {
            loop {
                if let Some(position) = *rx.borrow() {
                    return Ok(position);
                }
                rx.changed().await.map_err(|_| Error::LinkLost)?;
            }
        })
        .await
        .map_err(|_| Error::Timeout)?
    }

    /// Wait until all health checks pass.
    pub async fn wait_until_healthy(&self, timeout: Duration) -> Result<()> {
        wait_until(&self.health, timeout, |health| health.all_ok()).await
    }

    /// Wait until the vehicle reports being airborne.
    pub async fn wait_in_air(&self, timeout: Duration) -> Result<()> {
        wait_until(&self.in_air, timeout, |in_air| *in_air).await
    }

    /// Wait until the vehicle reports being on the ground.
    pub async fn wait_landed(&self, timeout: Duration) -> Result<()> {
        wait_until(&self.in_air, timeout, |in_air| !*in_air).await
    }

    /// Wait until the vehicle motors are disarmed.
    pub async fn wait_disarmed(&self, timeout: Duration) -> Result<()> {
        wait_until(&self.armed, timeout, |armed| !*armed).await
    }
}

async fn wait_until<T, F>(rx: &watch::Receiver<T>, timeout: Duration, predicate: F) -> Result<()>
where
    T: Clone + Send + Sync,
    F: Fn(&T) -> bool,
{
    let mut rx = rx.clone();
    tokio::time::timeout(timeout, async move {
        loop {
            if predicate(&rx.borrow()) {
                return Ok(());
            }
            rx.changed().await.map_err(|_| Error::LinkLost)?;
        }
    })
    .await
    .map_err(|_| Error::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{HEARTBEAT_DATA, EXTENDED_SYS_STATE_DATA};

    struct Feed {
        tx: flume::Sender<MavMessage>,
        // Keep the command channel ends alive for the lifetime of the test
        _uplink_rx: flume::Receiver<MavMessage>,
        _ack_tx: flume::Sender<MavMessage>,
    }

    fn telemetry_with_feed() -> (Feed, Telemetry) {
        let (tx, rx) = flume::unbounded();
        let (uplink, _uplink_rx) = flume::unbounded();
        let (_ack_tx, ack_rx) = flume::unbounded();
        let commands = Arc::new(Commands::new(
            uplink,
            ack_rx,
            crate::Target { system_id: 1, component_id: 1 },
        ));
        let telemetry = Telemetry::new(rx, commands);
        (Feed { tx, _uplink_rx, _ack_tx }, telemetry)
    }

    #[test]
    fn position_decodes_from_fixed_point_wire_units() {
        let position = position_from(&GLOBAL_POSITION_INT_DATA {
            lat: 370_000_000,
            lon: 1_270_000_000,
            alt: 100_000,
            relative_alt: 10_000,
            ..Default::default()
        });

        assert_eq!(position.latitude_deg, 37.0);
        assert_eq!(position.longitude_deg, 127.0);
        assert_eq!(position.absolute_altitude_m, 100.0);
        assert_eq!(position.relative_altitude_m, 10.0);
    }

    #[test]
    fn health_requires_present_enabled_and_healthy() {
        let sensors = MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_GPS;

        let health = health_from(&SYS_STATUS_DATA {
            onboard_control_sensors_present: sensors,
            onboard_control_sensors_enabled: sensors,
            onboard_control_sensors_health: sensors,
            ..Default::default()
        });
        assert!(health.all_ok());

        // A present but unhealthy magnetometer fails the check
        let degraded = health_from(&SYS_STATUS_DATA {
            onboard_control_sensors_present: sensors,
            onboard_control_sensors_enabled: sensors,
            onboard_control_sensors_health: sensors
                & !MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG,
            ..Default::default()
        });
        assert!(!degraded.magnetometer_ok);
        assert!(!degraded.all_ok());
    }

    #[test]
    fn landed_state_maps_to_in_air() {
        assert!(!in_air_from(MavLandedState::MAV_LANDED_STATE_ON_GROUND));
        assert!(!in_air_from(MavLandedState::MAV_LANDED_STATE_UNDEFINED));
        assert!(in_air_from(MavLandedState::MAV_LANDED_STATE_IN_AIR));
        assert!(in_air_from(MavLandedState::MAV_LANDED_STATE_TAKEOFF));
        assert!(in_air_from(MavLandedState::MAV_LANDED_STATE_LANDING));
    }

    #[tokio::test]
    async fn decoded_states_land_in_the_watch_channels() {
        let (feed, telemetry) = telemetry_with_feed();

        assert!(!telemetry.armed());
        assert_eq!(telemetry.position(), None);

        feed.tx
            .send(MavMessage::HEARTBEAT(HEARTBEAT_DATA {
                base_mode: MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED,
                ..Default::default()
            }))
            .unwrap();
        feed.tx
            .send(MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
                lat: 370_000_000,
                lon: 1_270_000_000,
                relative_alt: 10_000,
                ..Default::default()
            }))
            .unwrap();
        feed.tx.send(MavMessage::EXTENDED_SYS_STATE(EXTENDED_SYS_STATE_DATA {
            landed_state: MavLandedState::MAV_LANDED_STATE_IN_AIR,
            ..Default::default()
        }))
        .unwrap();

        let position = telemetry
            .wait_position(Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(position.latitude_deg, 37.0);

        telemetry.wait_in_air(Duration::from_millis(500)).await.unwrap();
        assert!(telemetry.armed());
    }

    #[tokio::test]
    async fn wait_until_healthy_times_out_without_updates() {
        let (_feed, telemetry) = telemetry_with_feed();

        let result = telemetry
            .wait_until_healthy(Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn rejects_non_positive_rates() {
        let (_feed, telemetry) = telemetry_with_feed();
        let result = telemetry.set_rate_position(0.0).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
