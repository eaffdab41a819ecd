// Fly an inward spiral around the current position as an autonomous mission.
//
// Usage: spiral_mission [connection]

use std::time::Duration;

use mavkit::plan::Spiral;
use mavkit::Vehicle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "udpin:0.0.0.0:14540".to_owned());

    println!("Connecting to {} ...", address);
    let vehicle = Vehicle::connect(&address).await?;

    println!("Waiting for the vehicle to be ready...");
    vehicle
        .telemetry
        .wait_until_healthy(Duration::from_secs(60))
        .await?;
    let home = vehicle
        .telemetry
        .wait_position(Duration::from_secs(60))
        .await?;

    let plan = Spiral {
        center_latitude_deg: home.latitude_deg,
        center_longitude_deg: home.longitude_deg,
        rings: 3,
        points_per_ring: 45,
        radius_deg: 0.0004,
        relative_altitude_m: 10.0,
        speed_m_s: 100.0 / 3.6,
    }
    .plan()?;
    println!("Mission size: {}", plan.mission_items.len());

    println!("Uploading mission...");
    vehicle.mission.upload(&plan).await?;

    println!("Arming...");
    vehicle.action.arm().await?;

    println!("Starting mission...");
    vehicle.mission.start().await?;

    let mut progress = vehicle.mission.progress_updates();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let progress = *progress.borrow();
            println!("Mission progress: {} / {}", progress.current, progress.total);
        }
    });

    vehicle
        .mission
        .wait_finished(Duration::from_secs(600))
        .await?;
    println!("Mission finished, returning to launch...");

    vehicle.action.return_to_launch().await?;
    vehicle
        .telemetry
        .wait_disarmed(Duration::from_secs(120))
        .await?;
    println!("Landed and disarmed, exiting.");

    vehicle.disconnect().await;
    Ok(())
}
