pub mod correlate;
pub mod socket;
pub mod udp;
pub mod wire;

pub use correlate::*;
pub use socket::*;
pub use udp::*;
pub use wire::*;
