//! Framed command protocol: codec and type codes.

pub mod codes;
mod frame;

pub use frame::{Frame, ProtocolError};
