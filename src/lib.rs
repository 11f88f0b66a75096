//! A peer-to-peer chat session layer on top of libp2p.
//!
//! The crate tracks which connections exist per remote peer, picks a
//! delivery target for outbound messages, decodes the various inbound
//! chunk shapes into text, and keeps a presence directory in sync by
//! polling a shared HTTP registry.

pub mod app;
pub mod codec;
pub mod net;
pub mod network;
pub mod presence;
pub mod registry;
pub mod types;
