//! # Mission plan generators
//!
//! Helpers that compute [MissionPlan]s from a compact geometric description, so the demos
//! and applications do not hand-write long waypoint lists.

use crate::subsystems::mission::{MissionItem, MissionPlan};
use crate::{Error, Result};

/// Inward-spiraling waypoint pattern around a center coordinate.
///
/// The pattern flies `rings` full circles of `points_per_ring` segments each. The radius
/// shrinks linearly from `radius_deg` down to (almost) zero as the waypoints are consumed,
/// which traces a spiral that tightens towards the center:
///
/// ```
/// use mavkit::plan::Spiral;
///
/// let plan = Spiral {
///     center_latitude_deg: 37.0,
///     center_longitude_deg: 127.0,
///     rings: 3,
///     points_per_ring: 45,
///     radius_deg: 0.0004,
///     relative_altitude_m: 10.0,
///     speed_m_s: 100.0 / 3.6,
/// }
/// .plan()
/// .unwrap();
///
/// assert_eq!(plan.mission_items.len(), 138);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Spiral {
    /// Latitude of the spiral center in degrees
    pub center_latitude_deg: f64,
    /// Longitude of the spiral center in degrees
    pub center_longitude_deg: f64,
    /// Number of full circles to fly
    pub rings: u32,
    /// Number of segments per circle
    pub points_per_ring: u32,
    /// Radius of the outermost ring, in degrees of latitude/longitude
    pub radius_deg: f64,
    /// Altitude of all waypoints, relative to the takeoff point, in meters
    pub relative_altitude_m: f32,
    /// Ground speed between waypoints in meters per second
    pub speed_m_s: f32,
}

impl Spiral {
    /// Compute the waypoint list.
    ///
    /// Each ring contains `points_per_ring + 1` waypoints: the segment endpoints plus a
    /// closing point back at the start angle, so consecutive rings join seamlessly. All
    /// waypoints are fly-through, the vehicle does not stop at them.
    pub fn plan(&self) -> Result<MissionPlan> {
        if self.rings == 0 {
            return Err(Error::InvalidArgument(
                "spiral needs at least one ring".to_owned(),
            ));
        }
        if self.points_per_ring == 0 {
            return Err(Error::InvalidArgument(
                "spiral needs at least one point per ring".to_owned(),
            ));
        }
        if !(self.radius_deg.is_finite() && self.radius_deg > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "spiral radius must be finite and positive, got {}",
                self.radius_deg
            )));
        }

        let scale = f64::from(self.rings) * f64::from(self.points_per_ring);
        let mut weight = scale;
        let mut items = Vec::with_capacity((self.rings * (self.points_per_ring + 1)) as usize);

        for _ in 0..self.rings {
            for i in 0..=self.points_per_ring {
                let angle = f64::from(i) * 2.0 * std::f64::consts::PI
                    / f64::from(self.points_per_ring);
                // Shrink by one step per waypoint, including the ring-closing one
                let shrink = weight / scale;
                weight -= 1.0;

                items.push(MissionItem {
                    latitude_deg: self.center_latitude_deg
                        + shrink * self.radius_deg * angle.sin(),
                    longitude_deg: self.center_longitude_deg
                        + shrink * self.radius_deg * angle.cos(),
                    relative_altitude_m: self.relative_altitude_m,
                    speed_m_s: self.speed_m_s,
                    is_fly_through: true,
                });
            }
        }

        Ok(MissionPlan {
            mission_items: items,
        })
    }
}
