//! Map-update decision.

use serde::Deserialize;

use crate::core::types::RigidTransform;

/// Which condition triggers a map rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapUpdateCondition {
    /// Rebuild when the reported overlap drops below the threshold.
    Overlap,
    /// Rebuild when enough time has passed since the last update.
    Delay,
    /// Rebuild when the sensor has moved far enough since the last update.
    Distance,
}

/// Pure decision function sequenced by the engine after each alignment.
#[derive(Debug, Clone)]
pub struct UpdatePolicy {
    pub condition: MapUpdateCondition,
    /// Overlap threshold in [0, 1] for [`MapUpdateCondition::Overlap`].
    pub overlap_threshold: f32,
    /// Delay in seconds for [`MapUpdateCondition::Delay`].
    pub delay_secs: f32,
    /// Translation in meters for [`MapUpdateCondition::Distance`].
    pub distance: f32,
    pub is_mapping: bool,
    pub is_online: bool,
}

impl UpdatePolicy {
    /// Decide whether to rebuild.
    ///
    /// Not mapping ⇒ never. Online with a rebuild in flight ⇒ never (this
    /// is the single gate enforcing at most one concurrent rebuild).
    /// Otherwise the configured condition applies, with strict
    /// inequalities. `last_update_stamp_us` is 0 before the first update,
    /// so the delay condition triggers immediately on a live clock.
    pub fn should_update(
        &self,
        now_us: u64,
        last_update_stamp_us: u64,
        pose: &RigidTransform,
        last_update_pose: &RigidTransform,
        overlap: f32,
        rebuild_busy: bool,
    ) -> bool {
        if !self.is_mapping {
            return false;
        }
        if self.is_online && rebuild_busy {
            return false;
        }
        match self.condition {
            MapUpdateCondition::Overlap => overlap < self.overlap_threshold,
            MapUpdateCondition::Delay => {
                let elapsed = now_us.saturating_sub(last_update_stamp_us) as f32 / 1e6;
                elapsed > self.delay_secs
            }
            MapUpdateCondition::Distance => {
                let moved = (pose.translation() - last_update_pose.translation()).norm();
                moved > self.distance
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(condition: MapUpdateCondition) -> UpdatePolicy {
        UpdatePolicy {
            condition,
            overlap_threshold: 0.9,
            delay_secs: 1.0,
            distance: 5.0,
            is_mapping: true,
            is_online: true,
        }
    }

    fn identity() -> RigidTransform {
        RigidTransform::identity(3)
    }

    #[test]
    fn test_overlap_strict_threshold() {
        let p = policy(MapUpdateCondition::Overlap);
        let id = identity();
        assert!(p.should_update(0, 0, &id, &id, 0.89, false));
        assert!(!p.should_update(0, 0, &id, &id, 0.9, false));
        assert!(!p.should_update(0, 0, &id, &id, 0.95, false));
    }

    #[test]
    fn test_not_mapping_never_updates() {
        let mut p = policy(MapUpdateCondition::Overlap);
        p.is_mapping = false;
        let id = identity();
        assert!(!p.should_update(0, 0, &id, &id, 0.0, false));
    }

    #[test]
    fn test_online_rebuild_busy_suppresses() {
        let p = policy(MapUpdateCondition::Overlap);
        let id = identity();
        assert!(!p.should_update(0, 0, &id, &id, 0.0, true));

        let mut offline = p.clone();
        offline.is_online = false;
        assert!(offline.should_update(0, 0, &id, &id, 0.0, true));
    }

    #[test]
    fn test_delay_condition() {
        let p = policy(MapUpdateCondition::Delay);
        let id = identity();
        // First ever call: last update stamp is the zero time.
        assert!(p.should_update(5_000_000, 0, &id, &id, 1.0, false));
        assert!(!p.should_update(5_500_000, 5_000_000, &id, &id, 1.0, false));
        assert!(p.should_update(6_100_000, 5_000_000, &id, &id, 1.0, false));
    }

    #[test]
    fn test_distance_condition() {
        let p = policy(MapUpdateCondition::Distance);
        let last = identity();
        let near = RigidTransform::from_translation(&[4.0, 0.0, 0.0]);
        let far = RigidTransform::from_translation(&[6.0, 0.0, 0.0]);
        assert!(!p.should_update(0, 0, &near, &last, 1.0, false));
        assert!(p.should_update(0, 0, &far, &last, 1.0, false));
    }
}
