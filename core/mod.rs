// Core module: Protocol definitions and types (NO I/O dependencies)
pub mod error;
pub mod geometry;
pub mod protocol;
pub mod types;

pub use error::*;
pub use geometry::*;
pub use protocol::*;
pub use types::*;
