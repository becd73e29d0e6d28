//! Shared vocabulary of the tusk upload service.
//!
//! This crate contains everything the server and the client must agree on:
//! the TUS wire-protocol constants, the `Upload-Metadata` grammar, the
//! checksum helpers, and the JSON documents exchanged outside the TUS
//! protocol itself (webhook notice, progress projection).

pub mod api;
pub mod checksum;
pub mod metadata;
