use crate::constants::BLOCK_SIZE;

/// One block of a piece as carried by Request and Cancel messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

impl BlockRequest {
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }
}

pub fn block_count(piece_length: u32) -> u32 {
    piece_length.div_ceil(BLOCK_SIZE)
}

/// Length of block `index`; only the last block of a piece may be short.
pub fn block_length(piece_length: u32, index: u32) -> u32 {
    let offset = index.saturating_mul(BLOCK_SIZE);
    piece_length.saturating_sub(offset).min(BLOCK_SIZE)
}
