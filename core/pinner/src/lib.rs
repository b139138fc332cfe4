mod error;
mod pinner;

pub use error::PinError;
pub use pinner::{PinMode, Pinner, PINS_KEY};

#[cfg(test)]
mod tests;
