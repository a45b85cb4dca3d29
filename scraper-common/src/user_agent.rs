use rand::seq::SliceRandom;

/// Uniform-random selection from a configured list of `User-Agent` strings.
/// Stateless beyond the pool itself, so a single instance is shared freely
/// across job loops without any locking.
#[derive(Debug, Clone)]
pub struct UserAgentRotator {
    pool: Vec<String>,
}

impl UserAgentRotator {
    pub fn new(pool: Vec<String>) -> Self {
        Self { pool }
    }

    /// Draws uniformly at random; `None` when the pool is empty, in which
    /// case the dispatcher omits the `User-Agent` header entirely.
    pub fn random(&self) -> Option<&str> {
        self.pool.choose(&mut rand::thread_rng()).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_returns_none() {
        let rotator = UserAgentRotator::new(vec![]);
        assert_eq!(rotator.random(), None);
    }

    #[test]
    fn single_entry_pool_always_returns_it() {
        let rotator = UserAgentRotator::new(vec!["UA/1".to_string()]);
        for _ in 0..5 {
            assert_eq!(rotator.random(), Some("UA/1"));
        }
    }
}
