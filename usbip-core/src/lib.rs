//! Core protocol, session, and device-management engine for a USB/IP server
//! daemon: wire codec, device adapter, export table, session state machine,
//! TCP acceptor, and the binding store/resolver/enumerator that feed it.
//!
//! See `SPEC_FULL.md` for the normative wire layout and component design.

#![forbid(unsafe_code)]

pub mod acceptor;
pub mod binding;
pub mod device;
pub mod enumerate;
pub mod error;
pub mod export;
pub mod hwdb;
pub mod proto;
pub mod resolver;
pub mod session;
pub mod speed;
