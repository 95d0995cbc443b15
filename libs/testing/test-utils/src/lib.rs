//! Shared test utilities for domain testing
//!
//! - `TestMongo`: MongoDB container with automatic cleanup (feature: "mongodb")
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: deterministic names and vectors (always available)
//! - `assertions`: custom assertion helpers (always available)
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["mongodb", "redis"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestMongo};
//!
//! #[tokio::test]
//! async fn my_store_test() {
//!     let mongo = TestMongo::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_store_test");
//!
//!     let db_name = builder.name("db", "main");
//!     let vectors = builder.vectors(3, 4);
//! }
//! ```

#[cfg(feature = "mongodb")]
mod mongodb;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "mongodb")]
pub use self::mongodb::TestMongo;

#[cfg(feature = "redis")]
pub use self::redis::TestRedis;

/// Builder for test data with deterministic randomization
///
/// The same seed always yields the same names and vector components.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_train_index");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Generate a unique name for testing
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.name("db", "main"), "test-db-7-main");
    /// ```
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }

    /// Components in `[-1, 1)` for the vector at `index`
    pub fn vector(&self, index: u64, dimension: usize) -> Vec<f32> {
        let mut state = self.seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (0..dimension)
            .map(|_| {
                let bits = splitmix64(&mut state) >> 40;
                (bits as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
            })
            .collect()
    }

    /// `count` vectors with ids `0..count`
    pub fn vectors(&self, count: usize, dimension: usize) -> Vec<(i64, Vec<f32>)> {
        (0..count as u64)
            .map(|i| (i as i64, self.vector(i, dimension)))
            .collect()
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Test assertion helpers
pub mod assertions {
    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert that two floats are within `tolerance`
    pub fn assert_close(actual: f32, expected: f32, tolerance: f32, context: &str) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "{}: expected {} (±{}), got {}",
            context,
            expected,
            tolerance,
            actual
        );
    }
}
