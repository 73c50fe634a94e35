//! Pure data types — no I/O, no framework dependencies.

pub mod chat;
pub mod peer;
pub mod wire;
