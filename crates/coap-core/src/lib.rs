//! Core types, constants, and wire formats for the CoAP protocol engine.
//!
//! This crate defines the message header types, the ordered option list and its
//! delta/length codec, the datagram parser/builder, and block option values.
//! It has no I/O and builds without `std`.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod block;
pub mod constants;
pub mod error;
pub mod message;
pub mod option;
pub mod types;

pub use block::BlockValue;
pub use constants::{MessageType, content_format};
pub use error::{BlockError, InvalidTokenLength, MessageError, OptionError};
pub use message::{Code, Message};
pub use option::{CoapOption, OptionList};
pub use types::Token;
