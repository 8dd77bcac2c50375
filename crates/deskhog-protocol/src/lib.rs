//! # deskhog-protocol
//!
//! DeskHog portal message types and codec.
//!
//! This crate defines the JSON shapes of the HTTP API (both the action API
//! and the legacy form endpoints the captive-portal page uses) and decodes
//! client payloads into typed core actions.

pub mod codec;
pub mod messages;

pub use codec::{decode_payload, decode_submit, CodecError};
pub use messages::*;
