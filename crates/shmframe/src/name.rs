//! Fresh segment names.
//!
//! The name is the only access control a segment has, so it comes from a
//! random source. The source is always passed in explicitly: production code
//! seeds one from OS entropy, tests seed one deterministically or supply their
//! own [`NameSource`].

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Produces the variable part of segment names.
pub trait NameSource {
    /// Next name stem. Successive calls should not repeat.
    fn next_name(&mut self) -> String;
}

impl<N: NameSource + ?Sized> NameSource for &mut N {
    fn next_name(&mut self) -> String {
        (**self).next_name()
    }
}

impl<N: NameSource + ?Sized> NameSource for Box<N> {
    fn next_name(&mut self) -> String {
        (**self).next_name()
    }
}

/// Decimal rendering of a random `u64` drawn from `R`.
#[derive(Debug, Clone)]
pub struct RandomNames<R> {
    rng: R,
}

impl<R: RngCore> RandomNames<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RandomNames<StdRng> {
    /// Seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Deterministic sequence, for tests and reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore> NameSource for RandomNames<R> {
    fn next_name(&mut self) -> String {
        self.rng.next_u64().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_sources_repeat() {
        let mut a = RandomNames::seeded(7);
        let mut b = RandomNames::seeded(7);
        for _ in 0..4 {
            assert_eq!(a.next_name(), b.next_name());
        }
    }

    #[test]
    fn names_are_decimal() {
        let mut names = RandomNames::seeded(1);
        let name = names.next_name();
        assert!(!name.is_empty());
        assert!(name.bytes().all(|b| b.is_ascii_digit()), "{name}");
    }

    #[test]
    fn successive_names_differ() {
        let mut names = RandomNames::from_entropy();
        let first = names.next_name();
        let second = names.next_name();
        assert_ne!(first, second);
    }

    #[test]
    fn borrowed_source_advances_original() {
        fn draw<N: NameSource>(mut source: N) -> String {
            source.next_name()
        }

        let mut names = RandomNames::seeded(3);
        let mut reference = RandomNames::seeded(3);
        assert_eq!(draw(&mut names), reference.next_name());
        assert_eq!(draw(Box::new(&mut names)), reference.next_name());
        assert_eq!(names.next_name(), reference.next_name());
    }
}
