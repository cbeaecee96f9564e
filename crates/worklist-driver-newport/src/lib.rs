//! Newport hardware drivers for lab_worklist.
//!
//! - Rotation stage controller addressed with `1mm?` state codes

mod newport_rotator;

pub use newport_rotator::{
    controller_state_from_code, NewportRotator, NewportRotatorConfig, NewportRotatorFactory,
    NEWPORT_BAUD,
};
