//! Planar laser-scan conversion.

use crate::core::types::PointCloud;

/// Raw 2-D range scan in polar coordinates.
///
/// Bridges converting planar scans into clouds use this before handing the
/// observation to the engine. Invalid returns (non-finite, zero, or out of
/// the [range_min, range_max] window) are dropped by the conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct LaserScan {
    /// Angle of the first return, radians.
    pub angle_min: f32,
    /// Angular step between consecutive returns, radians.
    pub angle_increment: f32,
    /// Minimum valid range, meters.
    pub range_min: f32,
    /// Maximum valid range, meters.
    pub range_max: f32,
    /// Range measurements, meters.
    pub ranges: Vec<f32>,
}

impl LaserScan {
    pub fn new(
        angle_min: f32,
        angle_increment: f32,
        range_min: f32,
        range_max: f32,
        ranges: Vec<f32>,
    ) -> Self {
        Self {
            angle_min,
            angle_increment,
            range_min,
            range_max,
            ranges,
        }
    }

    #[inline]
    pub fn is_valid_range(&self, range: f32) -> bool {
        range.is_finite() && range > 0.0 && range >= self.range_min && range <= self.range_max
    }

    /// Convert valid returns to a 2-D cloud in the sensor frame.
    pub fn to_point_cloud(&self) -> PointCloud {
        let points: Vec<[f32; 2]> = self
            .ranges
            .iter()
            .enumerate()
            .filter(|(_, &r)| self.is_valid_range(r))
            .map(|(i, &r)| {
                let angle = self.angle_min + i as f32 * self.angle_increment;
                [r * angle.cos(), r * angle.sin()]
            })
            .collect();
        PointCloud::from_xy(&points)
    }
}
