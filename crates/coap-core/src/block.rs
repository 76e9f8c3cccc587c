//! Block1/Block2 option values (RFC 7959 §2.2).
//!
//! The uint value packs `NUM << 4 | M << 3 | SZX`, block size is
//! `2^(SZX + 4)` for SZX 0..=6.

use crate::error::BlockError;
use crate::option::list::OptionList;

/// Largest block number that fits in 20 bits.
pub const MAX_BLOCK_NUM: u32 = (1 << 20) - 1;
pub const MIN_BLOCK_SIZE: usize = 16;
pub const MAX_BLOCK_SIZE: usize = 1024;
const MAX_SZX: u8 = 6;

/// Decoded block option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockValue {
    pub num: u32,
    pub more: bool,
    pub szx: u8,
}

impl BlockValue {
    pub fn new(num: u32, more: bool, szx: u8) -> Result<Self, BlockError> {
        if szx > MAX_SZX {
            return Err(BlockError::ReservedSize);
        }
        if num > MAX_BLOCK_NUM {
            return Err(BlockError::NumberTooLarge(num));
        }
        Ok(Self { num, more, szx })
    }

    /// Block size in bytes.
    pub fn size(&self) -> usize {
        1 << (self.szx + 4)
    }

    /// Byte offset of this block in the full body.
    pub fn offset(&self) -> usize {
        self.num as usize * self.size()
    }

    /// SZX for an exact power-of-two size in 16..=1024.
    pub fn szx_for_size(size: usize) -> Result<u8, BlockError> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&size) || !size.is_power_of_two() {
            return Err(BlockError::InvalidSize(size));
        }
        Ok(size.trailing_zeros() as u8 - 4)
    }

    /// Largest valid SZX whose size does not exceed `limit` (at least 16).
    pub fn szx_at_most(limit: usize) -> u8 {
        let mut szx = MAX_SZX;
        while szx > 0 && (1usize << (szx + 4)) > limit {
            szx -= 1;
        }
        szx
    }

    pub fn encode(&self) -> u32 {
        (self.num << 4) | (u32::from(self.more) << 3) | u32::from(self.szx)
    }

    pub fn decode(value: u32) -> Result<Self, BlockError> {
        let szx = (value & 0x07) as u8;
        let more = value & 0x08 != 0;
        let num = value >> 4;
        Self::new(num, more, szx)
    }

    /// Read block option `number` (Block1 or Block2) from `options`.
    pub fn from_options(options: &OptionList, number: u16) -> Result<Option<Self>, BlockError> {
        match options.get_uint(number)? {
            Some(raw) => Self::decode(raw).map(Some),
            None => Ok(None),
        }
    }

    /// Replace block option `number` in `options` with this value.
    pub fn write_to(&self, options: &mut OptionList, number: u16) {
        options.set_uint(number, self.encode());
    }
}
