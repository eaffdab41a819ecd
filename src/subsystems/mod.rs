//! # Vehicle subsystems
//!
//! The MAVLink microservices exposed by an autopilot are largely independent and each have
//! one logical role: commands, telemetry streams, mission transfer, setpoint streaming.
//! Modules here implement a Rust API for the subsystems this lib supports, they are the
//! main way to observe and control the vehicle.

pub mod action;
pub mod mission;
pub mod offboard;
pub mod telemetry;
