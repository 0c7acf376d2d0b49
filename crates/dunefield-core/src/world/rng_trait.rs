//! RNG trait abstraction for world simulation
//!
//! Simulation passes only need a handful of random primitives. Keeping them
//! behind a trait lets tests script exact outcomes while the world itself runs
//! on a seeded `Xoshiro256StarStar`.

/// Random number generator trait for world simulation
pub trait WorldRng {
    /// Generate random boolean with 50% probability
    fn gen_bool(&mut self) -> bool;

    /// Generate random f32 in [0.0, 1.0)
    fn gen_f32(&mut self) -> f32;

    /// Generate random integer in [low, high)
    fn gen_range_i32(&mut self, low: i32, high: i32) -> i32;

    /// Check if random value is less than probability threshold
    fn check_probability(&mut self, probability: f32) -> bool {
        self.gen_f32() < probability
    }

    /// True with probability 1/n (always true for n <= 1)
    fn one_in(&mut self, n: i32) -> bool {
        n <= 1 || self.gen_range_i32(0, n) == 0
    }
}

impl<T: ?Sized + rand::Rng> WorldRng for T {
    fn gen_bool(&mut self) -> bool {
        rand::Rng::r#gen(self)
    }

    fn gen_f32(&mut self) -> f32 {
        rand::Rng::r#gen(self)
    }

    fn gen_range_i32(&mut self, low: i32, high: i32) -> i32 {
        if high <= low {
            return low;
        }
        rand::Rng::gen_range(self, low..high)
    }
}
