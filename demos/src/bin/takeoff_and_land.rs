// Connect, wait until the vehicle is ready, take off, hover and land.
//
// Usage: takeoff_and_land [connection]
// The connection defaults to a local SITL vehicle on udp://:14540.

use std::time::Duration;

use mavkit::Vehicle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "udpin:0.0.0.0:14540".to_owned());

    println!("Connecting to {} ...", address);
    let vehicle = Vehicle::connect(&address).await?;
    println!("Discovered autopilot {:?}", vehicle.target());

    vehicle.telemetry.set_rate_position(1.0).await?;
    let mut positions = vehicle.telemetry.position_updates();
    tokio::spawn(async move {
        while let Ok(position) = positions.recv().await {
            println!("Altitude: {} m", position.relative_altitude_m);
        }
    });

    println!("Waiting for the vehicle to be ready to arm...");
    vehicle
        .telemetry
        .wait_until_healthy(Duration::from_secs(60))
        .await?;
    vehicle
        .telemetry
        .wait_position(Duration::from_secs(60))
        .await?;

    println!("Arming...");
    vehicle.action.arm().await?;

    println!("Taking off...");
    vehicle.action.set_takeoff_altitude(10.0);
    vehicle.action.takeoff().await?;
    vehicle
        .telemetry
        .wait_in_air(Duration::from_secs(30))
        .await?;

    println!("Hovering...");
    tokio::time::sleep(Duration::from_secs(10)).await;

    println!("Landing...");
    vehicle.action.land().await?;
    vehicle
        .telemetry
        .wait_landed(Duration::from_secs(60))
        .await?;
    println!("Landed!");

    vehicle
        .telemetry
        .wait_disarmed(Duration::from_secs(30))
        .await?;
    println!("Disarmed, exiting.");

    vehicle.disconnect().await;
    Ok(())
}
