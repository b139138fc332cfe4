use kiln_interfaces::types::Block;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

pub fn get_seedable_rng() -> StdRng {
    let seed: [u8; 32] = (0..32).collect::<Vec<u8>>().try_into().unwrap();
    SeedableRng::from_seed(seed)
}

/// Generates `count` raw blocks of `size` random bytes each.
pub fn random_blocks(rng: &mut StdRng, count: usize, size: usize) -> Vec<Block> {
    (0..count)
        .map(|_| {
            let mut data = vec![0; size];
            rng.fill_bytes(&mut data);
            Block::raw(data)
        })
        .collect()
}
