// ── Protocol model ──
//
// Addresses, envelopes, and tagged operation bodies.

pub mod address;
pub mod envelope;
pub mod ops;

pub use address::{LinkAddress, LinkKey};
pub use envelope::{Envelope, LaneHeader, LinkHeader};
pub use ops::{ListOp, MapOp};
