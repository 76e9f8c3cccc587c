//! CoAP options: numbers, ordered list, delta/length codec and uint values.

pub mod codec;
pub mod list;
pub mod number;
pub mod uint;

pub use codec::{decode, decode_blob, encode, encode_into, encode_to_slice, encoded_len};
pub use list::{CoapOption, OptionList};
pub use uint::{decode_uint, encode_uint};
