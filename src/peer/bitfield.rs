use bytes::Bytes;

/// A bit-per-piece presence map.
///
/// Bits are numbered from the high bit of the first byte. Indices past
/// `len()` are ignored by the mutators and read as absent; callers that
/// need a hard bounds error check the index themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    len: usize,
}

impl Bitfield {
    /// Creates an empty bitfield for `len` pieces.
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Creates a bitfield with every piece set.
    pub fn full(len: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; len.div_ceil(8)],
            len,
        };
        bf.clear_spare_bits();
        bf
    }

    /// Creates a bitfield from wire bytes. Short input is zero-padded and
    /// spare trailing bits are cleared.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Self {
        let mut bits = bytes.to_vec();
        bits.resize(len.div_ceil(8), 0);

        let mut bf = Self { bits, len };
        bf.clear_spare_bits();
        bf
    }

    pub fn has(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.bits[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    pub fn set(&mut self, index: usize) {
        self.set_to(index, true);
    }

    pub fn clear(&mut self, index: usize) {
        self.set_to(index, false);
    }

    pub fn set_to(&mut self, index: usize, value: bool) {
        if index >= self.len {
            return;
        }
        let mask = 1u8 << (7 - index % 8);
        if value {
            self.bits[index / 8] |= mask;
        } else {
            self.bits[index / 8] &= !mask;
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.len
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    /// Number of pieces covered.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Iterates over the indices of set bits in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.has(i))
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.len;
        if spare > 0 && spare < 8 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFFu8 << spare;
            }
        }
    }
}
