use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` updated lock-free via CAS on its bit pattern.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Applies `f` to the current value via a CAS retry loop, returning the
    /// value that was stored.
    pub fn update(&self, f: impl Fn(f64) -> f64) -> f64 {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let new = f(f64::from_bits(current)).to_bits();
            match self
                .0
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return f64::from_bits(new),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn add(&self, delta: f64) -> f64 {
        self.update(|old| old + delta)
    }
}
