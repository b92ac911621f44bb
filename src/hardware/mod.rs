//! Hardware abstractions.
//!
//! - [`capabilities`]: traits the acquisition engine drives
//! - [`mock`]: simulated devices

pub mod capabilities;
pub mod mock;

pub use capabilities::ImageSource;
pub use mock::MockCamera;
