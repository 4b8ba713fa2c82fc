//! Transport-agnostic protocol engine for the ACR38 family of smart-card
//! readers.
//!
//! This crate knows how to frame CCID and ACS requests, reassemble their
//! replies, build ISO 7816-4 APDUs, validate and walk a card layout
//! document, and classify card presence — all without touching a real USB
//! device. `acr38-usb` supplies the concrete transport; this crate supplies
//! everything that can be exercised against an in-memory stub instead.

pub mod acs;
pub mod ccid;
pub mod error;
pub mod facade;
pub mod ffi;
pub mod hex;
pub mod iso7816;
pub mod layout;
pub mod presence;
pub mod traversal;

pub use error::ReaderError;
pub use presence::CardPresence;
