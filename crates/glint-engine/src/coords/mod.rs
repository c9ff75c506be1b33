//! Small value types shared by operations and backends.
//!
//! Viewport rectangles are in physical pixels of the current target, origin
//! top-left, +Y down.

mod color;
mod viewport;

pub use color::Color;
pub use viewport::Viewport;
