//! Port implementations.
//!
//! Real NIC backends live outside this crate behind [`crate::port::ProbePort`];
//! the loopback port here is the software twin used for demos and tests.

mod loopback;

pub use loopback::LoopbackPort;
