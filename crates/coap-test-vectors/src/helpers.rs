//! Shared hex-decoding test helpers. Enable the `helpers` feature to use them.

/// Decode a hex string into a `Vec<u8>`.
pub fn hex_to_bytes(hex: &str) -> Vec<u8> {
    hex::decode(hex).expect("invalid hex")
}

/// Decode a `"c.dd"` code string into its raw byte.
pub fn code_byte(code: &str) -> u8 {
    let (class, detail) = code.split_once('.').expect("code must be c.dd");
    let class: u8 = class.parse().expect("invalid code class");
    let detail: u8 = detail.parse().expect("invalid code detail");
    (class << 5) | detail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_to_bytes_works() {
        assert_eq!(hex_to_bytes("deadbeef"), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(hex_to_bytes(""), Vec::<u8>::new());
    }

    #[test]
    fn code_byte_works() {
        assert_eq!(code_byte("0.01"), 0x01);
        assert_eq!(code_byte("2.05"), 0x45);
        assert_eq!(code_byte("4.04"), 0x84);
    }
}
