//! Motion sinks for analog locomotion
//!
//! Uses the tracker convention: +Y is up, +Z is forward. Vector and rotation
//! math is `glam`'s double-precision types.

use glam::{DQuat, DVec3};
use parking_lot::RwLock;
use tracing::trace;

/// Direction the holder moves for a positive analog reading
pub const FORWARD: DVec3 = DVec3::Z;

/// Unit copy of a sensor orientation; degenerate input becomes identity
pub fn unit_orientation(q: DQuat) -> DQuat {
    let len_sq = q.length_squared();
    if !len_sq.is_finite() || len_sq <= f64::EPSILON {
        return DQuat::IDENTITY;
    }
    q.normalize()
}

/// Target that analog movement is applied to
///
/// Implementations must not block; they are called from the analog loop.
pub trait MotionSink: Send + Sync {
    /// Translate the target by `delta` in its local space
    fn translate(&self, delta: DVec3);
}

/// Motion sink that integrates translations into a running position
#[derive(Default)]
pub struct PoseAccumulator {
    position: RwLock<DVec3>,
}

impl PoseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> DVec3 {
        *self.position.read()
    }
}

impl MotionSink for PoseAccumulator {
    fn translate(&self, delta: DVec3) {
        let mut pos = self.position.write();
        *pos += delta;
        trace!("Holder position now ({:.3}, {:.3}, {:.3})", pos.x, pos.y, pos.z);
    }
}
