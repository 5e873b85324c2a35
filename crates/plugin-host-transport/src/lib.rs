//! # Plugin Host Transport
//!
//! A MessagePack-RPC client over a UNIX stream socket, used by the
//! external plugin host to talk to plugin server processes.
//!
//! ```text
//! ┌─────────────────────┐
//! │  plugin-host-runtime │  (supervisor, registry, bridge)
//! ├─────────────────────┤
//! │  plugin-host-transport │  <- This crate
//! ├─────────────────────┤
//! │  UNIX stream socket  │
//! └─────────────────────┘
//! ```
//!
//! Reconnection is deliberately absent here — the supervisor opens a
//! fresh [`RpcClient`] after every respawn.

mod client;
mod message;

pub use client::{NotificationHandler, RpcClient};
pub use message::{decode_frame, from_msgpack_value, to_msgpack_value, Frame};
