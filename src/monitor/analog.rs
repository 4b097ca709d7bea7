//! Analog locomotion processing (deadzone, direction, vertical restriction)

use glam::{DQuat, DVec3};

use crate::config::MovementConfig;
use crate::motion::{unit_orientation, FORWARD};

/// Whether an analog reading is outside the deadzone
///
/// Readings with `|value| <= dead_zone` are noise. Non-finite readings never
/// count as input.
pub fn exceeds_dead_zone(value: f64, dead_zone: f64) -> bool {
    value.is_finite() && value.abs() > dead_zone
}

/// Compute the translation for one tick of analog input
///
/// # Arguments
/// * `value` - Raw analog reading in the device's native range
/// * `dead_zone` - Magnitude threshold below which nothing moves
/// * `movement` - Speed and vertical restriction
/// * `orientation` - Reference orientation rotating the forward vector, if any
///
/// # Returns
/// The translation to apply, or None if within deadzone. The magnitude is
/// always `speed` (or less once the vertical part is removed); only the sign
/// of `value` matters.
pub fn movement_vector(
    value: f64,
    dead_zone: f64,
    movement: &MovementConfig,
    orientation: Option<DQuat>,
) -> Option<DVec3> {
    if !exceeds_dead_zone(value, dead_zone) {
        return None;
    }

    let direction = match orientation {
        Some(q) => unit_orientation(q) * FORWARD,
        None => FORWARD,
    };

    let mut step = direction * movement.speed;
    if movement.restrict_vertical {
        step.y = 0.0;
    }

    if value > 0.0 {
        Some(step)
    } else {
        Some(-step)
    }
}
