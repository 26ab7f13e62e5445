//! Text line protocol spoken with the vehicle.
//!
//! This module contains:
//! - Outbound command encoding
//! - Inbound frame decoding

pub mod command;
pub mod inbound;

pub use command::{encode, Command, Direction, Light, Speed};
pub use inbound::{decode, decode_frames, InboundEvent};
