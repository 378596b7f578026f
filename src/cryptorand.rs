//! Random number generators backed by the operating system.

use rand::rand_core::UnwrapErr;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng, TryRngCore};

/// A fast standard RNG seeded from the operating system.
pub fn new() -> StdRng {
    StdRng::from_os_rng()
}

/// The operating system's RNG itself.
///
/// Every value is read from the OS, which makes this slower than [`new`] but
/// suitable for secrets. Panics if the OS source fails.
pub fn source() -> UnwrapErr<OsRng> {
    OsRng.unwrap_err()
}

/// A non-negative 63-bit integer.
pub fn int63<R: RngCore + ?Sized>(rng: &mut R) -> i64 {
    (rng.next_u64() & !(1_u64 << 63)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn int63_is_never_negative() {
        let mut rng = source();
        for _ in 0..1000 {
            assert!(int63(&mut rng) >= 0);
        }
    }

    #[test]
    fn int63_masks_the_sign_bit() {
        struct AllOnes;

        impl RngCore for AllOnes {
            fn next_u32(&mut self) -> u32 {
                u32::MAX
            }

            fn next_u64(&mut self) -> u64 {
                u64::MAX
            }

            fn fill_bytes(&mut self, dst: &mut [u8]) {
                dst.fill(0xff);
            }
        }

        assert_eq!(int63(&mut AllOnes), i64::MAX);
    }

    #[test]
    fn seeded_generators_differ() {
        let a: u128 = new().random();
        let b: u128 = new().random();

        assert_ne!(a, b);
    }
}
