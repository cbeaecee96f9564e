//! Thorlabs hardware drivers for lab_worklist.
//!
//! - ELL14 rotation mount on the Elliptec RS-485 bus
//!
//! Register the factory with the instrument set builder:
//!
//! ```rust,ignore
//! use worklist_driver_thorlabs::Ell14Factory;
//!
//! builder.register_factory(Box::new(Ell14Factory));
//! ```

mod ell14;
pub mod shared_ports;

pub use ell14::{
    degrees_to_hex, hex_to_degrees, Ell14Config, Ell14Driver, Ell14Factory, Ell14StatusCode,
    DEFAULT_STEPS_PER_DEGREE, ELL14_FACTORY_STEPS_PER_DEGREE, FINE_STEPS_PER_DEGREE,
};
pub use shared_ports::get_or_open_port;
