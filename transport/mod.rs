// Transport module: Abstract communication mechanisms
pub mod traits;
pub mod tcp;
pub mod udp;
pub mod ws;

pub use traits::*;
pub use tcp::*;
pub use udp::*;
pub use ws::*;
