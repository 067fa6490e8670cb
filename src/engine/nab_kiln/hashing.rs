use metrohash::MetroHash64;
use std::hash::Hasher;

// Stable 64-bit hash of a string, identical across runs and platforms
#[inline] #[must_use]
pub fn hash_str64(value: &str) -> u64
{
    let mut hasher = MetroHash64::new();
    hasher.write(value.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn stable_hash()
    {
        assert_eq!(hash_str64("textures/grass.png"), hash_str64("textures/grass.png"));
        assert_ne!(hash_str64("textures/grass.png"), hash_str64("textures/Grass.png"));
    }
}
