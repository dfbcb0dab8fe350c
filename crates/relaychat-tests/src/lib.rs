//! Integration test helpers for relaychat end-to-end scenarios.
//!
//! Nodes run in-process on ephemeral loopback ports with temporary chat
//! logs; clients and fake peers talk to them over real TCP.

pub mod harness;
