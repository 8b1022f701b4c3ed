//! Content-addressed embedding cache with single-flight de-duplication
//!
//! Cache key is a blake3 hash of (text, provider, model). Concurrent misses
//! for the same key collapse into one provider call; every waiter receives
//! that call's result or its failure. Entries are bounded by a total byte
//! budget with percentage-based compaction of the least recently used
//! entries. The bookkeeping locks are never held across a provider call.

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use ahash::AHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

type Key = [u8; 32];
type Outcome = Result<Arc<Vec<f32>>, EmbeddingError>;

struct CacheEntry {
    vector: Arc<Vec<f32>>,
    cost: usize,
    last_access: u64,
}

struct CacheState {
    entries: AHashMap<Key, CacheEntry>,
    total_bytes: usize,
    clock: u64,
}

/// Embedding cache. Explicitly constructed and injected, one per process.
pub struct EmbeddingCache {
    state: Mutex<CacheState>,
    in_flight: Mutex<AHashMap<Key, watch::Receiver<Option<Outcome>>>>,
    max_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    provider_calls: AtomicU64,
}

/// Word size used for per-entry byte accounting
const VECTOR_WORD_SIZE: usize = std::mem::size_of::<f32>();

/// Compact down to this fraction of the budget when over it
const COMPACTION_TARGET: f64 = 0.75;

impl EmbeddingCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: AHashMap::new(),
                total_bytes: 0,
                clock: 0,
            }),
            in_flight: Mutex::new(AHashMap::new()),
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
        }
    }

    fn cache_key(text: &str, provider: &str, model: &str) -> Key {
        let mut hasher = blake3::Hasher::new();
        hasher.update(text.as_bytes());
        hasher.update(&[0]);
        hasher.update(provider.as_bytes());
        hasher.update(&[0]);
        hasher.update(model.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Embed a single text through the cache
    pub async fn embed(
        &self,
        provider: &Arc<dyn EmbeddingProvider>,
        text: &str,
    ) -> Result<Arc<Vec<f32>>, EmbeddingError> {
        let key = Self::cache_key(text, provider.provider_name(), provider.model_name());

        loop {
            if let Some(vector) = self.lookup(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(vector);
            }

            match self.claim(key) {
                Claim::Leader(tx, guard) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    self.provider_calls.fetch_add(1, Ordering::Relaxed);

                    let outcome = provider
                        .embed(text)
                        .await
                        .map(|v| self.insert(key, text, v));

                    // Claim comes off before publishing, so latecomers see
                    // the cached entry instead of parking
                    drop(guard);
                    // Waiters may have dropped; a closed channel is fine
                    let _ = tx.send(Some(outcome.clone()));
                    return outcome;
                }
                Claim::Waiter(mut rx) => {
                    // Clone out of the watch::Ref so the mutable borrow of
                    // `rx` ends before the Err arm touches it again
                    let waited = rx.wait_for(Option::is_some).await.map(|value| value.clone());
                    match waited {
                        Ok(value) => {
                            // wait_for guarantees Some
                            if let Some(outcome) = value {
                                return outcome;
                            }
                        }
                        Err(_) => {
                            // Leader was cancelled before publishing; clear
                            // its dead claim so the retry takes leadership
                            self.evict_stale(&key, &rx);
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Embed many texts through the cache with one provider batch call for
    /// the texts this caller is the leader for
    pub async fn embed_batch(
        &self,
        provider: &Arc<dyn EmbeddingProvider>,
        texts: &[String],
    ) -> Result<Vec<Arc<Vec<f32>>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let provider_name = provider.provider_name().to_string();
        let model_name = provider.model_name().to_string();

        let mut results: Vec<Option<Arc<Vec<f32>>>> = vec![None; texts.len()];
        let mut leader_keys: Vec<Key> = Vec::new();
        let mut leader_guards: Vec<InFlightGuard<'_>> = Vec::new();
        let mut leader_texts: Vec<String> = Vec::new();
        // position in leader_texts, or a waiter receiver
        let mut pending: Vec<(usize, Pending)> = Vec::new();
        let mut leader_txs: AHashMap<Key, watch::Sender<Option<Outcome>>> = AHashMap::new();

        for (i, text) in texts.iter().enumerate() {
            let key = Self::cache_key(text, &provider_name, &model_name);

            if let Some(vector) = self.lookup(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                results[i] = Some(vector);
                continue;
            }

            self.misses.fetch_add(1, Ordering::Relaxed);

            // One leader per distinct key, even within this batch
            if let Some(pos) = leader_keys.iter().position(|k| *k == key) {
                pending.push((i, Pending::Leader(pos)));
                continue;
            }

            match self.claim(key) {
                Claim::Leader(tx, guard) => {
                    leader_txs.insert(key, tx);
                    leader_guards.push(guard);
                    pending.push((i, Pending::Leader(leader_texts.len())));
                    leader_keys.push(key);
                    leader_texts.push(text.clone());
                }
                Claim::Waiter(rx) => pending.push((i, Pending::Waiter(rx))),
            }
        }

        // One batched provider call covers every key this caller leads
        let batch_outcome: Result<Vec<Arc<Vec<f32>>>, EmbeddingError> = if leader_texts.is_empty() {
            Ok(Vec::new())
        } else {
            self.provider_calls.fetch_add(1, Ordering::Relaxed);
            provider.embed_batch(&leader_texts).await.and_then(|vectors| {
                if vectors.len() != leader_texts.len() {
                    return Err(EmbeddingError::GenerationError(format!(
                        "Embedding count mismatch: expected {}, got {}",
                        leader_texts.len(),
                        vectors.len()
                    )));
                }
                Ok(vectors
                    .into_iter()
                    .zip(leader_keys.iter().zip(leader_texts.iter()))
                    .map(|(v, (key, text))| self.insert(*key, text, v))
                    .collect())
            })
        };

        // Publish to waiters of every led key, success or failure
        for ((pos, key), guard) in leader_keys.iter().enumerate().zip(leader_guards) {
            drop(guard);
            if let Some(tx) = leader_txs.remove(key) {
                let outcome = match &batch_outcome {
                    Ok(vectors) => Ok(Arc::clone(&vectors[pos])),
                    Err(e) => Err(e.clone()),
                };
                let _ = tx.send(Some(outcome));
            }
        }

        let leader_vectors = batch_outcome?;

        for (i, entry) in pending {
            match entry {
                Pending::Leader(pos) => {
                    results[i] = Some(Arc::clone(&leader_vectors[pos]));
                }
                Pending::Waiter(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(value) => value.clone(),
                        Err(_) => None,
                    };
                    match outcome {
                        Some(Ok(vector)) => results[i] = Some(vector),
                        Some(Err(e)) => return Err(e),
                        // Leader vanished; fall back to a direct call
                        None => {
                            let vector = Box::pin(self.embed(provider, &texts[i])).await?;
                            results[i] = Some(vector);
                        }
                    }
                }
            }
        }

        Ok(results
            .into_iter()
            .map(|v| v.expect("every slot resolved"))
            .collect())
    }

    fn lookup(&self, key: &Key) -> Option<Arc<Vec<f32>>> {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.clock += 1;
        let clock = state.clock;
        state.entries.get_mut(key).map(|entry| {
            entry.last_access = clock;
            Arc::clone(&entry.vector)
        })
    }

    fn claim(&self, key: Key) -> Claim<'_> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        if let Some(rx) = in_flight.get(&key) {
            return Claim::Waiter(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        in_flight.insert(key, rx);
        Claim::Leader(tx, InFlightGuard { cache: self, key })
    }

    fn release(&self, key: &Key) {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        in_flight.remove(key);
    }

    /// Remove a claim whose leader died without publishing. Only the exact
    /// stale channel is removed; a newer claim for the key stays.
    fn evict_stale(&self, key: &Key, stale: &watch::Receiver<Option<Outcome>>) {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        if let Some(current) = in_flight.get(key) {
            if current.same_channel(stale) {
                in_flight.remove(key);
            }
        }
    }

    fn insert(&self, key: Key, text: &str, vector: Vec<f32>) -> Arc<Vec<f32>> {
        let cost = text.len() + vector.len() * VECTOR_WORD_SIZE;
        let vector = Arc::new(vector);

        let mut state = self.state.lock().expect("cache lock poisoned");
        state.clock += 1;
        let clock = state.clock;

        if let Some(old) = state.entries.insert(
            key,
            CacheEntry {
                vector: Arc::clone(&vector),
                cost,
                last_access: clock,
            },
        ) {
            state.total_bytes -= old.cost;
        }
        state.total_bytes += cost;

        if state.total_bytes > self.max_bytes {
            self.compact(&mut state);
        }

        vector
    }

    /// Evict least-recently-used entries until under the compaction target
    fn compact(&self, state: &mut CacheState) {
        let target = (self.max_bytes as f64 * COMPACTION_TARGET) as usize;

        let mut by_access: Vec<(Key, u64, usize)> = state
            .entries
            .iter()
            .map(|(k, e)| (*k, e.last_access, e.cost))
            .collect();
        by_access.sort_by_key(|(_, last_access, _)| *last_access);

        let before = state.total_bytes;
        for (key, _, cost) in by_access {
            if state.total_bytes <= target {
                break;
            }
            state.entries.remove(&key);
            state.total_bytes -= cost;
        }

        tracing::debug!(
            "Embedding cache compacted: {} -> {} bytes ({} entries remain)",
            before,
            state.total_bytes,
            state.entries.len()
        );
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().expect("cache lock poisoned");
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
        }
    }
}

/// Releases the in-flight claim when dropped, so a leader cancelled
/// mid-provider-call never leaves waiters parked on a dead channel
struct InFlightGuard<'a> {
    cache: &'a EmbeddingCache,
    key: Key,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}

enum Claim<'a> {
    Leader(watch::Sender<Option<Outcome>>, InFlightGuard<'a>),
    Waiter(watch::Receiver<Option<Outcome>>),
}

enum Pending {
    Leader(usize),
    Waiter(watch::Receiver<Option<Outcome>>),
}

/// Cache observability counters
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub provider_calls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Provider that counts calls and can be slowed down or made to fail
    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(20),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(20),
                fail: true,
            }
        }

        fn slow(delay_ms: u64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(delay_ms),
                fail: false,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(EmbeddingError::GenerationError("boom".to_string()));
            }
            Ok(vec![text.len() as f32, 1.0, 2.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(EmbeddingError::GenerationError("boom".to_string()));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 2.0]).collect())
        }

        fn dimensions(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "counting-model"
        }

        fn provider_name(&self) -> &str {
            "counting"
        }
    }

    fn provider(p: CountingProvider) -> Arc<dyn EmbeddingProvider> {
        Arc::new(p)
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let cache = EmbeddingCache::new(1024 * 1024);
        let p = provider(CountingProvider::new());

        let a = cache.embed(&p, "hello").await.unwrap();
        let b = cache.embed(&p, "hello").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(cache.stats().provider_calls, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_single_flight_collapses_concurrent_calls() {
        let cache = Arc::new(EmbeddingCache::new(1024 * 1024));
        let counting = Arc::new(CountingProvider::new());
        let p: Arc<dyn EmbeddingProvider> = counting.clone();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let p = Arc::clone(&p);
            handles.push(tokio::spawn(async move {
                cache.embed(&p, "same text").await
            }));
        }

        let mut vectors = Vec::new();
        for handle in handles {
            vectors.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(counting.call_count(), 1);
        for v in &vectors {
            assert_eq!(v, &vectors[0]);
        }
    }

    #[tokio::test]
    async fn test_failure_reaches_all_waiters_and_is_not_cached() {
        let cache = Arc::new(EmbeddingCache::new(1024 * 1024));
        let counting = Arc::new(CountingProvider::failing());
        let p: Arc<dyn EmbeddingProvider> = counting.clone();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let p = Arc::clone(&p);
            handles.push(tokio::spawn(async move { cache.embed(&p, "doomed").await }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }

        assert_eq!(counting.call_count(), 1);
        assert_eq!(cache.stats().entries, 0);

        // A later call tries the provider again
        let _ = cache.embed(&p, "doomed").await;
        assert_eq!(counting.call_count(), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_per_model() {
        let cache = EmbeddingCache::new(1024 * 1024);

        let k1 = EmbeddingCache::cache_key("text", "p", "model-a");
        let k2 = EmbeddingCache::cache_key("text", "p", "model-b");
        let k3 = EmbeddingCache::cache_key("text", "q", "model-a");
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);

        drop(cache);
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_the_key() {
        let cache = Arc::new(EmbeddingCache::new(1024 * 1024));
        let counting = Arc::new(CountingProvider::slow(300));
        let p: Arc<dyn EmbeddingProvider> = counting.clone();

        let leader = tokio::spawn({
            let cache = Arc::clone(&cache);
            let p = Arc::clone(&p);
            async move { cache.embed(&p, "interrupted").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        // The retry must take leadership and make a fresh provider call
        let vector =
            tokio::time::timeout(Duration::from_secs(2), cache.embed(&p, "interrupted"))
                .await
                .expect("retry must not hang")
                .unwrap();
        assert_eq!(vector.len(), 3);
        assert_eq!(counting.call_count(), 2);
    }

    #[tokio::test]
    async fn test_waiter_recovers_when_leader_is_cancelled() {
        let cache = Arc::new(EmbeddingCache::new(1024 * 1024));
        let counting = Arc::new(CountingProvider::slow(300));
        let p: Arc<dyn EmbeddingProvider> = counting.clone();

        let leader = tokio::spawn({
            let cache = Arc::clone(&cache);
            let p = Arc::clone(&p);
            async move { cache.embed(&p, "shared").await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let waiter = tokio::spawn({
            let cache = Arc::clone(&cache);
            let p = Arc::clone(&p);
            async move { cache.embed(&p, "shared").await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        leader.abort();
        let _ = leader.await;

        let vector = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter must not hang")
            .unwrap()
            .unwrap();
        assert_eq!(vector.len(), 3);
        assert_eq!(counting.call_count(), 2);
    }

    #[tokio::test]
    async fn test_byte_budget_compaction() {
        // Each entry costs text len + 3 * 4 bytes; budget fits only a few
        let cache = EmbeddingCache::new(200);
        let p = provider(CountingProvider::new());

        for i in 0..20 {
            let text = format!("note body number {:02}", i);
            cache.embed(&p, &text).await.unwrap();
        }

        let stats = cache.stats();
        assert!(stats.total_bytes <= 200);
        assert!(stats.entries < 20);
    }

    #[tokio::test]
    async fn test_batch_one_provider_call_with_duplicates() {
        let cache = EmbeddingCache::new(1024 * 1024);
        let counting = Arc::new(CountingProvider::new());
        let p: Arc<dyn EmbeddingProvider> = counting.clone();

        let texts = vec![
            "alpha".to_string(),
            "beta".to_string(),
            "alpha".to_string(),
            "gamma".to_string(),
        ];
        let vectors = cache.embed_batch(&p, &texts).await.unwrap();

        assert_eq!(vectors.len(), 4);
        assert_eq!(vectors[0], vectors[2]);
        assert_eq!(counting.call_count(), 1);

        // Second batch is fully cached
        let again = cache.embed_batch(&p, &texts).await.unwrap();
        assert_eq!(again.len(), 4);
        assert_eq!(counting.call_count(), 1);
    }
}
