// Take off, fly a short offboard routine from direct setpoints, land.
//
// Usage: offboard_velocity [connection] [velocity|attitude]
// The default routine turns in place from body-velocity setpoints, `attitude`
// holds a 30 degree roll from attitude setpoints instead.

use std::time::Duration;

use mavkit::subsystems::offboard::{Attitude, VelocityBodyYawspeed};
use mavkit::Vehicle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "udpin:0.0.0.0:14540".to_owned());
    let routine = std::env::args().nth(2).unwrap_or_else(|| "velocity".to_owned());

    println!("Connecting to {} ...", address);
    let vehicle = Vehicle::connect(&address).await?;

    println!("Waiting for the vehicle to be ready...");
    vehicle
        .telemetry
        .wait_until_healthy(Duration::from_secs(60))
        .await?;
    vehicle
        .telemetry
        .wait_position(Duration::from_secs(60))
        .await?;

    println!("Arming and taking off...");
    vehicle.action.arm().await?;
    vehicle.action.set_takeoff_altitude(10.0);
    vehicle.action.takeoff().await?;
    vehicle
        .telemetry
        .wait_in_air(Duration::from_secs(30))
        .await?;
    tokio::time::sleep(Duration::from_secs(5)).await;

    match routine.as_str() {
        "velocity" => {
            // Hold position while the setpoint stream starts
            vehicle
                .offboard
                .set_velocity_body(VelocityBodyYawspeed::default());
            println!("Starting offboard...");
            vehicle.offboard.start().await?;

            println!("Turning around the yaw axis...");
            vehicle.offboard.set_velocity_body(VelocityBodyYawspeed {
                yawspeed_deg_s: 160.0,
                ..Default::default()
            });
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        "attitude" => {
            vehicle.offboard.set_attitude(Attitude {
                thrust_value: 0.6,
                ..Default::default()
            });
            println!("Starting offboard...");
            vehicle.offboard.start().await?;

            println!("Rolling 30 degrees right...");
            vehicle.offboard.set_attitude(Attitude {
                roll_deg: 30.0,
                thrust_value: 0.6,
                ..Default::default()
            });
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        other => return Err(format!("unknown routine: {}", other).into()),
    }

    println!("Stopping offboard...");
    vehicle.offboard.stop().await?;

    println!("Landing...");
    vehicle.action.land().await?;
    vehicle
        .telemetry
        .wait_landed(Duration::from_secs(60))
        .await?;
    vehicle
        .telemetry
        .wait_disarmed(Duration::from_secs(60))
        .await?;
    println!("Landed and disarmed, exiting.");

    vehicle.disconnect().await;
    Ok(())
}
