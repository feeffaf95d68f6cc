//! Deterministic seeding of target commands.

use rand::SeedableRng;
use rand::rngs::StdRng;
use sha2::{Digest, Sha256};

/// Seed for `key` derived from the global seed.
///
/// Stable across runs and platforms: the first eight bytes of
/// `sha256("{global}:{key}")`, big-endian.
pub fn derive_seed(global: u64, key: &str) -> u64 {
  let digest = Sha256::digest(format!("{}:{}", global, key).as_bytes());
  let mut bytes = [0u8; 8];
  bytes.copy_from_slice(&digest[..8]);
  u64::from_be_bytes(bytes)
}

/// Replaces an ambient generator with a seeded one until dropped.
///
/// The previous generator state is restored on every exit path, including
/// when the future holding the scope is dropped mid-evaluation.
pub struct SeedScope<'a> {
  ambient: &'a mut StdRng,
  saved: Option<StdRng>,
}

impl<'a> SeedScope<'a> {
  pub fn enter(ambient: &'a mut StdRng, seed: u64) -> Self {
    let saved = std::mem::replace(ambient, StdRng::seed_from_u64(seed));
    Self {
      ambient,
      saved: Some(saved),
    }
  }

  pub fn rng(&mut self) -> &mut StdRng {
    self.ambient
  }
}

impl Drop for SeedScope<'_> {
  fn drop(&mut self) {
    if let Some(saved) = self.saved.take() {
      *self.ambient = saved;
    }
  }
}
