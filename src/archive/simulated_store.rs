//! Simulated Blob Store with Fault Injection
//!
//! DST-compatible wrapper that injects faults from a seeded ChaCha RNG, so
//! a failing seed replays the same sequence of faults.

use super::blob_store::{BlobAttributes, BlobStore, BulkDeleteResult, ListResult, PutResult, StoredBlob};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of PUT operation failure
    pub put_fail_prob: f64,
    /// Probability of GET operation failure
    pub get_fail_prob: f64,
    /// Probability of single DELETE failure
    pub delete_fail_prob: f64,
    /// Probability of a whole bulk delete request failing
    pub bulk_delete_fail_prob: f64,
    /// Per-key probability of a bulk delete rejecting that key
    pub bulk_delete_reject_prob: f64,
    /// Probability that an object reported by EXISTS is gone by the next GET
    pub vanish_after_exists_prob: f64,
    /// Per-entry probability of a LIST page omitting an object
    pub list_omit_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.01,            // 1%
            get_fail_prob: 0.01,            // 1%
            delete_fail_prob: 0.01,         // 1%
            bulk_delete_fail_prob: 0.01,    // 1%
            bulk_delete_reject_prob: 0.005, // 0.5%
            vanish_after_exists_prob: 0.005,
            list_omit_prob: 0.02,
            latency_range_us: (0, 1_000),
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.05,
            get_fail_prob: 0.05,
            delete_fail_prob: 0.05,
            bulk_delete_fail_prob: 0.05,
            bulk_delete_reject_prob: 0.02,
            vanish_after_exists_prob: 0.05,
            list_omit_prob: 0.05,
            latency_range_us: (0, 5_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.0,
            get_fail_prob: 0.0,
            delete_fail_prob: 0.0,
            bulk_delete_fail_prob: 0.0,
            bulk_delete_reject_prob: 0.0,
            vanish_after_exists_prob: 0.0,
            list_omit_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub put_attempts: u64,
    pub put_failures: u64,
    pub get_attempts: u64,
    pub get_failures: u64,
    pub exists_attempts: u64,
    pub vanished: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub bulk_delete_attempts: u64,
    pub bulk_delete_failures: u64,
    pub keys_rejected: u64,
    pub list_attempts: u64,
    pub list_omissions: u64,
    pub late_writes: u64,
}

impl SimulatedStoreStats {
    /// Number of calls that could have changed store contents
    pub fn mutation_attempts(&self) -> u64 {
        self.put_attempts + self.delete_attempts + self.bulk_delete_attempts
    }
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
    /// Remaining bulk deletes allowed before every further one fails
    bulk_delete_budget: Option<u64>,
    late_write: Option<LateWrite>,
}

/// A write by another client, landing right after a listing has been served
struct LateWrite {
    prefix: String,
    listings_left: u64,
    key: String,
    data: Vec<u8>,
}

impl SimulatedStoreInner {
    fn roll(&mut self, prob: f64) -> bool {
        prob > 0.0 && self.rng.gen_bool(prob.min(1.0))
    }
}

/// Simulated blob store that wraps another store and injects faults
pub struct SimulatedBlobStore<S: BlobStore> {
    inner_store: Arc<S>,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S: BlobStore> SimulatedBlobStore<S> {
    /// Create a new simulated store driven by `seed`
    pub fn new(inner_store: Arc<S>, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedBlobStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
                bulk_delete_budget: None,
                late_write: None,
            })),
        }
    }

    /// The wrapped store, for inspecting ground truth
    pub fn inner(&self) -> &Arc<S> {
        &self.inner_store
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// Allow `n` more bulk deletes, then fail every one after, as if the
    /// process died partway through a purge
    pub fn fail_bulk_deletes_after(&self, n: u64) {
        self.state.lock().bulk_delete_budget = Some(n);
    }

    /// Write `key` to the wrapped store as soon as the `nth` listing of
    /// `prefix` (counting only first pages) has been returned. The listing
    /// that triggered it does not include the key.
    pub fn write_after_listing(&self, prefix: &str, nth: u64, key: &str, data: &[u8]) {
        self.state.lock().late_write = Some(LateWrite {
            prefix: prefix.to_string(),
            listings_left: nth.max(1),
            key: key.to_string(),
            data: data.to_vec(),
        });
    }

    fn take_due_late_write(&self, prefix: &str, continuation_token: Option<&str>) -> Option<LateWrite> {
        if continuation_token.is_some() {
            return None;
        }
        let mut s = self.state.lock();
        let due = match s.late_write.as_mut() {
            Some(w) if w.prefix == prefix => {
                w.listings_left -= 1;
                w.listings_left == 0
            }
            _ => false,
        };
        if due {
            s.stats.late_writes += 1;
            s.late_write.take()
        } else {
            None
        }
    }

    /// Lift a limit set by `fail_bulk_deletes_after`
    pub fn heal(&self) {
        self.state.lock().bulk_delete_budget = None;
    }

    async fn simulate_latency(&self) {
        let (min, max) = self.config.latency_range_us;
        if min == 0 && max == 0 {
            return;
        }
        let latency_us = if max > min {
            self.state.lock().rng.gen_range(min..max)
        } else {
            min
        };
        if latency_us > 0 {
            tokio::time::sleep(std::time::Duration::from_micros(latency_us)).await;
        }
    }
}

impl<S: BlobStore> Clone for SimulatedBlobStore<S> {
    fn clone(&self) -> Self {
        SimulatedBlobStore {
            inner_store: self.inner_store.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S: BlobStore> BlobStore for SimulatedBlobStore<S> {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
        attributes: &'a BlobAttributes,
    ) -> Pin<Box<dyn Future<Output = IoResult<PutResult>> + Send + 'a>> {
        Box::pin(async move {
            let should_fail = {
                let mut s = self.state.lock();
                s.stats.put_attempts += 1;
                let fail = s.roll(self.config.put_fail_prob);
                if fail {
                    s.stats.put_failures += 1;
                }
                fail
            };
            if should_fail {
                return Err(IoError::new(ErrorKind::Other, "simulated put failure"));
            }

            self.simulate_latency().await;
            self.inner_store.put(key, data, attributes).await
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<StoredBlob>> + Send + 'a>> {
        Box::pin(async move {
            let should_fail = {
                let mut s = self.state.lock();
                s.stats.get_attempts += 1;
                let fail = s.roll(self.config.get_fail_prob);
                if fail {
                    s.stats.get_failures += 1;
                }
                fail
            };
            if should_fail {
                return Err(IoError::new(ErrorKind::Other, "simulated get failure"));
            }

            self.simulate_latency().await;
            self.inner_store.get(key).await
        })
    }

    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            self.state.lock().stats.exists_attempts += 1;
            let exists = self.inner_store.exists(key).await?;

            // A concurrent deleter removes the object right after we saw it
            let vanish = exists && {
                let mut s = self.state.lock();
                let vanish = s.roll(self.config.vanish_after_exists_prob);
                if vanish {
                    s.stats.vanished += 1;
                }
                vanish
            };
            if vanish {
                self.inner_store.delete(key).await?;
            }

            Ok(exists)
        })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let should_fail = {
                let mut s = self.state.lock();
                s.stats.delete_attempts += 1;
                let fail = s.roll(self.config.delete_fail_prob);
                if fail {
                    s.stats.delete_failures += 1;
                }
                fail
            };
            if should_fail {
                return Err(IoError::new(ErrorKind::Other, "simulated delete failure"));
            }

            self.inner_store.delete(key).await
        })
    }

    fn bulk_delete<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = IoResult<BulkDeleteResult>> + Send + 'a>> {
        Box::pin(async move {
            let (should_fail, rejected) = {
                let mut s = self.state.lock();
                s.stats.bulk_delete_attempts += 1;

                let crashed = match s.bulk_delete_budget.as_mut() {
                    Some(0) => true,
                    Some(remaining) => {
                        *remaining -= 1;
                        false
                    }
                    None => false,
                };
                let fail = crashed || s.roll(self.config.bulk_delete_fail_prob);
                if fail {
                    s.stats.bulk_delete_failures += 1;
                }

                let mut rejected = vec![false; keys.len()];
                if !fail {
                    for slot in rejected.iter_mut() {
                        *slot = s.roll(self.config.bulk_delete_reject_prob);
                    }
                }
                (fail, rejected)
            };
            if should_fail {
                return Err(IoError::new(ErrorKind::Other, "simulated bulk delete failure"));
            }

            self.simulate_latency().await;

            let accepted: Vec<String> = keys
                .iter()
                .zip(&rejected)
                .filter(|(_, r)| !**r)
                .map(|(k, _)| k.clone())
                .collect();
            let mut result = self.inner_store.bulk_delete(&accepted).await?;

            for (key, _) in keys.iter().zip(&rejected).filter(|(_, r)| **r) {
                result.failed.push((key.clone(), "simulated InternalError".to_string()));
            }
            self.state.lock().stats.keys_rejected += result.failed.len() as u64;

            Ok(result)
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>> {
        Box::pin(async move {
            self.state.lock().stats.list_attempts += 1;
            let mut result = self.inner_store.list(prefix, continuation_token).await?;

            // Eventually consistent listing: some present objects go unreported
            if self.config.list_omit_prob > 0.0 {
                let mut s = self.state.lock();
                let before = result.objects.len();
                let prob = self.config.list_omit_prob;
                result.objects.retain(|_| !s.roll(prob));
                s.stats.list_omissions += (before - result.objects.len()) as u64;
            }

            if let Some(write) = self.take_due_late_write(prefix, continuation_token) {
                self.inner_store
                    .put(&write.key, &write.data, &BlobAttributes::default())
                    .await?;
            }

            Ok(result)
        })
    }
}
