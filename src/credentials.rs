use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);

/// A key handed out by [`CredentialPool::acquire`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    key: String,
}

impl Credential {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "...{}", key_tail(&self.key))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("key", &format_args!("...{}", key_tail(&self.key)))
            .finish()
    }
}

fn key_tail(key: &str) -> &str {
    let start = key
        .char_indices()
        .rev()
        .nth(3)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &key[start..]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub total: usize,
    pub current_index: usize,
    pub rate_limited_count: usize,
}

struct PoolState {
    cursor: usize,
    cooldowns: HashMap<usize, Instant>,
}

/// Round-robin pool of completion-provider keys with per-key cooldowns.
///
/// Holds one lazily-built client per key; the pool owns those clients and
/// drops them in [`CredentialPool::shutdown`].
pub struct CredentialPool<C> {
    keys: Vec<String>,
    cooldown: Duration,
    state: Mutex<PoolState>,
    clients: Mutex<HashMap<usize, C>>,
}

impl<C: Clone> CredentialPool<C> {
    pub fn new(keys: Vec<String>, cooldown: Duration) -> anyhow::Result<Self> {
        if keys.is_empty() {
            anyhow::bail!("Credential pool requires at least one API key");
        }
        info!("Credential pool initialized with {} API key(s)", keys.len());
        Ok(Self {
            keys,
            cooldown,
            state: Mutex::new(PoolState {
                cursor: 0,
                cooldowns: HashMap::new(),
            }),
            clients: Mutex::new(HashMap::new()),
        })
    }

    pub fn acquire(&self) -> Credential {
        self.acquire_at(Instant::now())
    }

    pub(crate) fn acquire_at(&self, now: Instant) -> Credential {
        let mut state = self.lock_state();

        let keys = &self.keys;
        state.cooldowns.retain(|&index, &mut expiry| {
            let active = expiry > now;
            if !active {
                info!(
                    "API key ending in ...{} is available again",
                    key_tail(&keys[index])
                );
            }
            active
        });

        let len = self.keys.len();
        for offset in 0..len {
            let index = (state.cursor + offset) % len;
            if !state.cooldowns.contains_key(&index) {
                state.cursor = index;
                return self.credential(index);
            }
        }

        // Every key is cooling down: hand out the one that frees up first.
        let index = state
            .cooldowns
            .iter()
            .min_by(|(a_index, a_expiry), (b_index, b_expiry)| {
                a_expiry.cmp(b_expiry).then(a_index.cmp(b_index))
            })
            .map(|(&index, _)| index)
            .unwrap_or(0);
        warn!("All API keys are rate limited, using the one that expires soonest");
        self.credential(index)
    }

    pub fn penalize(&self, credential: &Credential) {
        self.penalize_at(credential, Instant::now());
    }

    pub(crate) fn penalize_at(&self, credential: &Credential, now: Instant) {
        let Some(index) = self.keys.iter().position(|k| k == credential.key()) else {
            warn!("Ignoring penalty for key {} not in pool", credential);
            return;
        };

        let mut state = self.lock_state();
        state.cooldowns.insert(index, now + self.cooldown);
        state.cursor = (index + 1) % self.keys.len();
        warn!(
            "API key {} is rate limited for {}s, switching to next key",
            credential,
            self.cooldown.as_secs()
        );
    }

    pub fn describe(&self) -> PoolStatus {
        self.describe_at(Instant::now())
    }

    pub(crate) fn describe_at(&self, now: Instant) -> PoolStatus {
        let state = self.lock_state();
        PoolStatus {
            total: self.keys.len(),
            current_index: state.cursor,
            rate_limited_count: state.cooldowns.values().filter(|&&e| e > now).count(),
        }
    }

    /// Returns the cached client for `credential`, building it on first use.
    pub fn client<E>(
        &self,
        credential: &Credential,
        connect: impl FnOnce(&str) -> Result<C, E>,
    ) -> Result<C, E> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(&credential.index) {
            return Ok(client.clone());
        }
        let client = connect(credential.key())?;
        clients.insert(credential.index, client.clone());
        Ok(client)
    }

    pub fn shutdown(&self) {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = clients.len();
        clients.clear();
        info!("Released {} completion client(s)", count);
    }

    fn credential(&self, index: usize) -> Credential {
        Credential {
            index,
            key: self.keys[index].clone(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // Every mutation is a single assignment, so a poisoned guard still holds consistent state.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pool(keys: &[&str]) -> CredentialPool<String> {
        CredentialPool::new(keys.iter().map(|k| k.to_string()).collect(), DEFAULT_COOLDOWN)
            .unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(CredentialPool::<()>::new(Vec::new(), DEFAULT_COOLDOWN).is_err());
    }

    #[test]
    fn acquire_returns_a_pool_key() {
        let pool = pool(&["key-a", "key-b", "key-c"]);
        for _ in 0..10 {
            let credential = pool.acquire();
            assert!(["key-a", "key-b", "key-c"].contains(&credential.key()));
        }
    }

    #[test]
    fn acquire_sticks_to_cursor_until_penalized() {
        let pool = pool(&["key-a", "key-b"]);
        assert_eq!(pool.acquire().key(), "key-a");
        assert_eq!(pool.acquire().key(), "key-a");
    }

    #[test]
    fn penalize_moves_to_another_key() {
        let pool = pool(&["key-a", "key-b", "key-c"]);
        let now = Instant::now();

        let first = pool.acquire_at(now);
        pool.penalize_at(&first, now);
        let second = pool.acquire_at(now);
        assert_ne!(first, second);
        assert_eq!(second.key(), "key-b");

        pool.penalize_at(&second, now);
        assert_eq!(pool.acquire_at(now).key(), "key-c");
    }

    #[test]
    fn penalize_skips_keys_still_cooling_down() {
        let pool = pool(&["key-a", "key-b", "key-c"]);
        let now = Instant::now();

        let c = Credential {
            index: 2,
            key: "key-c".into(),
        };
        pool.penalize_at(&c, now);
        // cursor wrapped to key-a
        let a = pool.acquire_at(now);
        assert_eq!(a.key(), "key-a");
        pool.penalize_at(&a, now);
        assert_eq!(pool.acquire_at(now).key(), "key-b");
    }

    #[test]
    fn all_keys_cooling_down_returns_soonest_expiry() {
        let pool = pool(&["key-a", "key-b", "key-c"]);
        let start = Instant::now();

        for (offset, index) in [(2, 0usize), (0, 1), (1, 2)] {
            let credential = pool.credential(index);
            pool.penalize_at(&credential, start + Duration::from_secs(offset));
        }

        // key-b was penalized first, so it frees up first.
        let credential = pool.acquire_at(start + Duration::from_secs(3));
        assert_eq!(credential.key(), "key-b");
    }

    #[test]
    fn soonest_expiry_ties_break_on_lowest_index() {
        let pool = pool(&["key-a", "key-b"]);
        let now = Instant::now();
        pool.penalize_at(&pool.credential(1), now);
        pool.penalize_at(&pool.credential(0), now);
        assert_eq!(pool.acquire_at(now).key(), "key-a");
    }

    #[test]
    fn cooldown_expires() {
        let pool = pool(&["key-a", "key-b"]);
        let now = Instant::now();

        let a = pool.acquire_at(now);
        pool.penalize_at(&a, now);
        let b = pool.acquire_at(now);
        pool.penalize_at(&b, now);
        assert_eq!(pool.describe_at(now).rate_limited_count, 2);

        let later = now + DEFAULT_COOLDOWN;
        assert_eq!(pool.describe_at(later).rate_limited_count, 0);
        // cursor sits on key-a after key-b's penalty; both keys are eligible again
        assert_eq!(pool.acquire_at(later).key(), "key-a");
        assert_eq!(pool.describe_at(later).rate_limited_count, 0);
    }

    #[test]
    fn describe_reports_cursor_and_cooldowns() {
        let pool = pool(&["key-a", "key-b", "key-c"]);
        let now = Instant::now();
        let a = pool.acquire_at(now);
        pool.penalize_at(&a, now);

        let status = pool.describe_at(now);
        assert_eq!(
            status,
            PoolStatus {
                total: 3,
                current_index: 1,
                rate_limited_count: 1,
            }
        );
    }

    #[test]
    fn penalizing_unknown_key_is_ignored() {
        let pool = pool(&["key-a"]);
        let stranger = Credential {
            index: 0,
            key: "other".into(),
        };
        pool.penalize(&stranger);
        assert_eq!(pool.describe().rate_limited_count, 0);
    }

    #[test]
    fn clients_are_built_once_per_key() {
        let pool = pool(&["key-a", "key-b"]);
        let mut builds = 0;

        let a = pool.acquire();
        for _ in 0..3 {
            let client: Result<String, ()> = pool.client(&a, |key| {
                builds += 1;
                Ok(format!("client-{key}"))
            });
            assert_eq!(client.unwrap(), "client-key-a");
        }
        assert_eq!(builds, 1);

        pool.shutdown();
        let _ = pool.client::<()>(&a, |key| {
            builds += 1;
            Ok(key.to_string())
        });
        assert_eq!(builds, 2);
    }

    #[test]
    fn display_masks_key() {
        let pool = pool(&["sk-secret-1234"]);
        let credential = pool.acquire();
        assert_eq!(credential.to_string(), "...1234");
        assert!(!format!("{:?}", credential).contains("secret"));
    }

    #[test]
    fn concurrent_acquire_and_penalize_stay_consistent() {
        let pool = Arc::new(pool(&["key-a", "key-b", "key-c", "key-d"]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let credential = pool.acquire();
                        pool.penalize(&credential);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let status = pool.describe();
        assert_eq!(status.total, 4);
        assert!(status.current_index < 4);
        assert!(status.rate_limited_count <= 4);
    }
}
