//! # MAVLink vehicle control library
//!
//! This crate allows to connect, monitor and control a MAVLink-speaking flight controller
//! (PX4 or compatible) using the [mavlink] crate for transport and message encoding. The
//! connection string is handed directly to the link layer, so serial, UDP and TCP endpoints
//! are all supported (for example `udpin:0.0.0.0:14540` for a SITL vehicle).
//!
//! ## Status
//!
//! The vehicle functionalities are implemented in subsystems. The current status is:
//!
//! | Subsystem | Support |
//! |-----------|---------|
//! | Action | Arm, disarm, takeoff, land, return to launch |
//! | Telemetry | Position, armed, in-air, health, rate control |
//! | Mission | Upload, start, progress tracking |
//! | Offboard | Body-velocity and attitude setpoints |
//! | Camera | None |
//! | Gimbal | None |
//!
//! ## Usage
//!
//! The basic procedure to use the lib is:
//!  - Create a [Vehicle] from a connection string, this waits for the autopilot to be
//!    discovered (first heartbeat) and initializes the subsystems
//!  - Subsystems are available as public fields of the [Vehicle] struct
//!  - Use the subsystems to observe and control the vehicle
//!  - Drop the Vehicle object or call [Vehicle::disconnect()]
//!
//! All subsystem functions only take an un-mutable reference to self (`&self`), the
//! intention is for the Vehicle object to be shared between tasks using `Arc<>`.
//!
//! For example:
//! ``` no_run
//! # async fn test() -> Result<(), Box<dyn std::error::Error>> {
//! let vehicle = mavkit::Vehicle::connect("udpin:0.0.0.0:14540").await?;
//!
//! vehicle.telemetry.wait_until_healthy(std::time::Duration::from_secs(60)).await?;
//!
//! vehicle.action.arm().await?;
//! vehicle.action.takeoff().await?;
//! tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//! vehicle.action.land().await?;
//!
//! vehicle.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod command;
mod error;
mod link;
mod vehicle;

pub mod plan;
pub mod subsystems;

pub use crate::error::{Error, Result};
pub use crate::link::Target;
pub use crate::vehicle::Vehicle;

/// Default time to wait for the first autopilot heartbeat when connecting.
pub const DEFAULT_DISCOVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Default time to wait for a command acknowledgment or protocol answer.
pub const DEFAULT_COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);
