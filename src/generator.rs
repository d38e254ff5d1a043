use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{DanError, Result};
use crate::types::Width;
use crate::universe::NumberUniverse;

/// Draw `count` distinct members of the `width` universe.
///
/// Runs a Fisher-Yates shuffle over the universe and stops after `count`
/// swaps, so every ordered selection is equally likely. The same
/// `(count, width, seed)` always yields the same sequence; `None` seeds from
/// the operating system's entropy source.
pub fn generate(count: usize, width: Width, seed: Option<u64>) -> Result<Vec<String>> {
    let universe = NumberUniverse::new(width);
    let size = universe.size() as usize;

    if count > size {
        return Err(DanError::InvalidRequest(format!(
            "cannot draw {} distinct numbers from a universe of {}",
            count, size
        )));
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut pool: Vec<u32> = (0..size as u32).collect();
    for i in 0..count {
        let j = rng.gen_range(i..size);
        pool.swap(i, j);
    }

    Ok(pool[..count].iter().map(|&v| universe.format(v)).collect())
}

/// Same as [`generate`] for request payloads that carry a signed count.
pub fn generate_signed(count: i64, width: Width, seed: Option<u64>) -> Result<Vec<String>> {
    let count = usize::try_from(count)
        .map_err(|_| DanError::InvalidRequest(format!("count must not be negative, got {}", count)))?;
    generate(count, width, seed)
}
