//! Randomized endpoint selection with session affinity
//!
//! An attested session lives on one backend behind a load balancer. Once a
//! backend hands out a session cookie, later requests go back to the same
//! endpoint with that cookie until the session is dropped.

use rand::{seq::SliceRandom, Rng};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::errors::{FogWalletError, FogWalletResult};

#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<String>,
    sessions: Mutex<HashMap<String, String>>,
}

impl EndpointPool {
    /// Build a pool from distinct endpoint URIs; duplicates are dropped
    pub fn new<I, S>(endpoints: I) -> FogWalletResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for endpoint in endpoints {
            let endpoint = endpoint.into();
            if !unique.contains(&endpoint) {
                unique.push(endpoint);
            }
        }
        if unique.is_empty() {
            return Err(FogWalletError::ConfigError(
                "endpoint pool needs at least one endpoint".to_string(),
            ));
        }
        Ok(Self {
            endpoints: unique,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Pick the endpoint for the next request.
    ///
    /// An endpoint holding a session wins; otherwise one is chosen uniformly.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let sessions = self.sessions();
        if let Some(endpoint) = self
            .endpoints
            .iter()
            .find(|endpoint| sessions.contains_key(endpoint.as_str()))
        {
            return endpoint;
        }
        drop(sessions);
        self.endpoints
            .choose(rng)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn choose_random(&self) -> &str {
        self.choose(&mut rand::thread_rng())
    }

    /// Remember the session cookie `endpoint` returned; unknown endpoints are ignored
    pub fn record_cookie(&self, endpoint: &str, cookie: impl Into<String>) -> bool {
        if !self.endpoints.iter().any(|known| known == endpoint) {
            return false;
        }
        #[cfg(feature = "tracing")]
        debug!("Session established with {}", endpoint);
        self.sessions().insert(endpoint.to_string(), cookie.into());
        true
    }

    pub fn cookie_for(&self, endpoint: &str) -> Option<String> {
        self.sessions().get(endpoint).cloned()
    }

    /// Forget the session with `endpoint`, e.g. after an attestation failure
    pub fn drop_session(&self, endpoint: &str) -> Option<String> {
        self.sessions().remove(endpoint)
    }

    pub fn clear_sessions(&self) {
        self.sessions().clear();
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    fn pool() -> EndpointPool {
        EndpointPool::new(["https://a.example", "https://b.example", "https://c.example"])
            .unwrap()
    }

    #[test]
    fn test_rejects_empty_and_deduplicates() {
        assert!(matches!(
            EndpointPool::new(Vec::<String>::new()),
            Err(FogWalletError::ConfigError(_))
        ));
        let pool = EndpointPool::new(["x", "y", "x"]).unwrap();
        assert_eq!(pool.endpoints(), &["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_random_choice_covers_pool() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(7);
        let chosen: HashSet<String> = (0..200)
            .map(|_| pool.choose(&mut rng).to_string())
            .collect();
        assert_eq!(chosen.len(), 3);
    }

    #[test]
    fn test_session_affinity() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(pool.record_cookie("https://b.example", "session=abc"));
        assert!(!pool.record_cookie("https://unknown.example", "session=zzz"));

        for _ in 0..20 {
            assert_eq!(pool.choose(&mut rng), "https://b.example");
        }
        assert_eq!(
            pool.cookie_for("https://b.example").as_deref(),
            Some("session=abc")
        );

        assert_eq!(
            pool.drop_session("https://b.example").as_deref(),
            Some("session=abc")
        );
        assert_eq!(pool.cookie_for("https://b.example"), None);
    }
}
