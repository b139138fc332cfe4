use bit_set::BitSet;
use kiln_interfaces::prelude::*;
use parking_lot::RwLock;

/// A fixed-size bloom filter over block multihashes.
///
/// Keyed by the multihash rather than the full CID, so both versions of a dag-pb CID map to the
/// same bits.
pub struct BloomFilter {
    bits: RwLock<BitSet>,
    num_bits: usize,
    hashes: usize,
}

impl BloomFilter {
    /// Creates a filter of `size` bytes using `hashes` hash functions.
    pub fn new(size: usize, hashes: usize) -> Self {
        let num_bits = (size * 8).max(1);
        Self {
            bits: RwLock::new(BitSet::with_capacity(num_bits)),
            num_bits,
            hashes: hashes.max(1),
        }
    }

    pub fn add(&self, cid: &Cid) {
        let mut bits = self.bits.write();
        for pos in self.positions(cid) {
            bits.insert(pos);
        }
    }

    /// False means the block is definitely absent.
    pub fn may_contain(&self, cid: &Cid) -> bool {
        let bits = self.bits.read();
        self.positions(cid).all(|pos| bits.contains(pos))
    }

    // Double hashing: h1 + i * h2.
    fn positions(&self, cid: &Cid) -> impl Iterator<Item = usize> {
        let digest = cid.hash().digest();
        let h1 = fxhash::hash64(&(0u8, digest));
        let h2 = fxhash::hash64(&(1u8, digest)) | 1;
        let m = self.num_bits as u64;
        (0..self.hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }
}
