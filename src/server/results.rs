//! In-memory storage for results that clients will poll for.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::{
    prelude::*,
    queues::{ocr::OcrResult, work::JobHandle},
};

/// A stored result, and when it became final.
#[derive(Debug)]
struct StoredResult {
    result: OcrResult,
    finished_at: Option<Instant>,
}

/// Results of OCR jobs submitted in poll mode, keyed by result ID.
///
/// Entries are created with `status: "processing"`, replaced by the final
/// result when the job finishes, and removed once a client has fetched the
/// final result. Final results which nobody fetches are dropped after `ttl`.
#[derive(Debug)]
pub struct PendingResults {
    ttl: Duration,
    results: Mutex<HashMap<String, StoredResult>>,
}

impl PendingResults {
    /// Create an empty store which keeps unfetched final results for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            results: Mutex::new(HashMap::new()),
        }
    }

    /// Record `pending`, and fill in the job's final result when it arrives.
    ///
    /// The final result keeps the ID of `pending`, so that clients can keep
    /// polling the ID we gave them.
    pub fn track(self: &Arc<Self>, pending: OcrResult, handle: JobHandle<OcrResult>) {
        let id = pending.id.clone();
        self.insert(pending);
        let results = self.clone();
        tokio::spawn(async move {
            let run = handle.run();
            let finished = match handle.result().await {
                Ok(result) => OcrResult { id, ..result },
                Err(err) => {
                    error!(run, "OCR job failed without a result: {:?}", err);
                    OcrResult {
                        id,
                        ..OcrResult::failed()
                    }
                }
            };
            debug!(id = %finished.id, status = ?finished.status, "Stored OCR result");
            results.insert(finished);
        });
    }

    /// Look up a result. Finished results are removed once fetched.
    pub fn fetch(&self, id: &str) -> Option<OcrResult> {
        let mut results = self.results.lock().expect("lock poisoned");
        self.evict_expired(&mut results);
        let result = results.get(id)?.result.clone();
        if result.is_finished() {
            results.remove(id);
        }
        Some(result)
    }

    /// How many results are we holding?
    #[cfg(test)]
    fn len(&self) -> usize {
        self.results.lock().expect("lock poisoned").len()
    }

    /// Insert or replace a result.
    fn insert(&self, result: OcrResult) {
        let finished_at = result.is_finished().then(Instant::now);
        let mut results = self.results.lock().expect("lock poisoned");
        self.evict_expired(&mut results);
        results.insert(
            result.id.clone(),
            StoredResult {
                result,
                finished_at,
            },
        );
    }

    /// Drop final results which have waited longer than `ttl`.
    fn evict_expired(&self, results: &mut HashMap<String, StoredResult>) {
        let before = results.len();
        results.retain(|_, stored| {
            stored
                .finished_at
                .is_none_or(|finished_at| finished_at.elapsed() < self.ttl)
        });
        let evicted = before - results.len();
        if evicted > 0 {
            debug!(evicted, "Evicted unfetched OCR results");
        }
    }
}
