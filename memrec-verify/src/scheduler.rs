//! Concurrent verification workers over one authenticated session
//!
//! A greedy pull-queue: workers claim the next pending index from a shared
//! cursor, so slow records never stall the rest of the list. Each worker
//! owns one search tab; a worker whose tab dies gets a replacement from the
//! page factory and keeps going.

use crate::matching;
use crate::search_page::{PageFactory, SearchPage};
use crate::store::ResultStore;
use memrec_common::config::Settings;
use memrec_common::ident;
use memrec_common::types::{CandidateRecord, VerificationRecord};
use memrec_common::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Worker-pool tuning for one verification run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrent worker tabs under the one authenticated session
    pub workers: usize,
    /// ID-search retries per record
    pub retries: u32,
}

/// Aggregate outcome of one scheduler run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub processed: usize,
    pub found: usize,
    pub not_found: usize,
    pub errors: usize,
}

pub struct Scheduler {
    settings: Arc<Settings>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(settings: Arc<Settings>, config: SchedulerConfig) -> Self {
        Self { settings, config }
    }

    /// Verify every pending candidate, fanning out across worker tabs.
    ///
    /// Returns once the pending list is exhausted or `cancel` fires. Every
    /// processed record lands in `store` before the next one is claimed, so
    /// interrupting mid-run loses at most the in-flight records.
    pub async fn run(
        &self,
        factory: Arc<dyn PageFactory>,
        pending: Vec<CandidateRecord>,
        store: Arc<ResultStore>,
        cancel: CancellationToken,
    ) -> Result<RunStats> {
        let worker_count = self.config.workers.max(1).min(pending.len().max(1));
        let mut pages = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            pages.push(factory.open_page().await?);
        }
        tracing::info!(count = pages.len(), "Spawned worker page(s) for verification");

        let pending = Arc::new(pending);
        let cursor = Arc::new(AtomicUsize::new(0));
        let stats = Arc::new(SharedStats::default());

        let mut handles = Vec::with_capacity(pages.len());
        for (index, page) in pages.into_iter().enumerate() {
            let worker = Worker {
                id: index + 1,
                settings: Arc::clone(&self.settings),
                retries: self.config.retries,
                factory: Arc::clone(&factory),
                pending: Arc::clone(&pending),
                store: Arc::clone(&store),
                cursor: Arc::clone(&cursor),
                stats: Arc::clone(&stats),
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run(page)));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        Ok(stats.snapshot())
    }
}

struct Worker {
    id: usize,
    settings: Arc<Settings>,
    retries: u32,
    factory: Arc<dyn PageFactory>,
    pending: Arc<Vec<CandidateRecord>>,
    store: Arc<ResultStore>,
    cursor: Arc<AtomicUsize>,
    stats: Arc<SharedStats>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, mut page: Box<dyn SearchPage>) {
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(worker = self.id, "Cancellation requested; worker stopping");
                return;
            }
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(candidate) = self.pending.get(idx) else {
                return;
            };

            let id = ident::sanitize(candidate.member_id.as_deref().unwrap_or_default());
            let shown_id = if id.digits.is_empty() {
                &id.original
            } else {
                &id.digits
            };
            let label = format!(
                "{}/{} [w{}] ID={} ({} {})",
                idx + 1,
                self.pending.len(),
                self.id,
                shown_id,
                candidate.first_name.as_deref().unwrap_or_default(),
                candidate.last_name.as_deref().unwrap_or_default(),
            );
            tracing::info!("Checking {label}");
            let started = Instant::now();

            let outcome = matching::verify_candidate(
                page.as_ref(),
                &self.settings,
                candidate,
                &id,
                self.retries,
            )
            .await;
            let elapsed = started.elapsed().as_millis();

            match outcome {
                Ok((fallback_used, result)) => {
                    let verdict = if result.is_found() {
                        self.stats.found.fetch_add(1, Ordering::SeqCst);
                        "FOUND"
                    } else {
                        self.stats.not_found.fetch_add(1, Ordering::SeqCst);
                        "NOT FOUND"
                    };
                    let method = result.method.map(|m| m.as_str()).unwrap_or("none");
                    tracing::info!("Done {label} -> {verdict} via {method} in {elapsed}ms");
                    self.store
                        .append(VerificationRecord::from_match(
                            candidate,
                            &id,
                            fallback_used,
                            result,
                        ))
                        .await;
                }
                Err(e) => {
                    tracing::error!("Error while checking {label} after {elapsed}ms: {e}");
                    self.stats.errors.fetch_add(1, Ordering::SeqCst);
                    self.store
                        .append(VerificationRecord::from_error(candidate, &id, e.to_string()))
                        .await;
                    if e.is_session_closed() {
                        match self.factory.open_page().await {
                            Ok(fresh) => {
                                page = fresh;
                                tracing::warn!(
                                    worker = self.id,
                                    "Recovered by opening a fresh page after closure"
                                );
                            }
                            Err(spawn_err) => {
                                tracing::error!(
                                    worker = self.id,
                                    error = %spawn_err,
                                    "Failed to replace closed page; worker stopping"
                                );
                                return;
                            }
                        }
                    }
                }
            }
            self.stats.processed.fetch_add(1, Ordering::SeqCst);

            // Polite throttle between checks
            tokio::select! {
                _ = sleep(self.settings.timing.politeness_delay()) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }
}

#[derive(Default)]
struct SharedStats {
    processed: AtomicUsize,
    found: AtomicUsize,
    not_found: AtomicUsize,
    errors: AtomicUsize,
}

impl SharedStats {
    fn snapshot(&self) -> RunStats {
        RunStats {
            processed: self.processed.load(Ordering::SeqCst),
            found: self.found.load(Ordering::SeqCst),
            not_found: self.not_found.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_page::RowHit;
    use async_trait::async_trait;
    use memrec_common::Error;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct GoodPage;

    #[async_trait]
    impl SearchPage for GoodPage {
        async fn open_search(&self) -> Result<()> {
            Ok(())
        }
        async fn fill_first_visible(&self, _selectors: &[String], _value: &str) -> Result<bool> {
            Ok(true)
        }
        async fn clear_fields(&self, _selectors: &[String]) -> Result<()> {
            Ok(())
        }
        async fn trigger_search(&self, _selectors: &[String]) -> Result<()> {
            Ok(())
        }
        async fn wait_settled(&self) -> Result<()> {
            Ok(())
        }
        async fn find_text_hit(&self, needle: &str) -> Result<Option<RowHit>> {
            Ok(Some(RowHit {
                text: format!("{needle} Ada Lovelace"),
                href: None,
            }))
        }
        async fn result_rows(&self, _selectors: &[String]) -> Result<Vec<RowHit>> {
            Ok(Vec::new())
        }
        async fn current_url(&self) -> Result<String> {
            Ok("https://registry.test/search".to_string())
        }
    }

    /// Every interaction fails as if the tab was torn down.
    struct ClosedPage;

    #[async_trait]
    impl SearchPage for ClosedPage {
        async fn open_search(&self) -> Result<()> {
            Err(Error::SessionClosed("target closed".to_string()))
        }
        async fn fill_first_visible(&self, _selectors: &[String], _value: &str) -> Result<bool> {
            Err(Error::SessionClosed("target closed".to_string()))
        }
        async fn clear_fields(&self, _selectors: &[String]) -> Result<()> {
            Err(Error::SessionClosed("target closed".to_string()))
        }
        async fn trigger_search(&self, _selectors: &[String]) -> Result<()> {
            Err(Error::SessionClosed("target closed".to_string()))
        }
        async fn wait_settled(&self) -> Result<()> {
            Err(Error::SessionClosed("target closed".to_string()))
        }
        async fn find_text_hit(&self, _needle: &str) -> Result<Option<RowHit>> {
            Err(Error::SessionClosed("target closed".to_string()))
        }
        async fn result_rows(&self, _selectors: &[String]) -> Result<Vec<RowHit>> {
            Err(Error::SessionClosed("target closed".to_string()))
        }
        async fn current_url(&self) -> Result<String> {
            Err(Error::SessionClosed("target closed".to_string()))
        }
    }

    /// Vends a scripted sequence of pages, then good ones forever.
    struct ScriptedFactory {
        dead_first: Mutex<bool>,
        opened: AtomicUsize,
    }

    #[async_trait]
    impl PageFactory for ScriptedFactory {
        async fn open_page(&self) -> Result<Box<dyn SearchPage>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let mut dead = self.dead_first.lock().unwrap();
            if *dead {
                *dead = false;
                Ok(Box::new(ClosedPage))
            } else {
                Ok(Box::new(GoodPage))
            }
        }
    }

    fn fast_settings() -> Arc<Settings> {
        let mut s = Settings::default();
        s.timing.politeness_delay_ms = 0;
        s.timing.retry_backoff_ms = 1;
        s.timing.settle_delay_ms = 0;
        Arc::new(s)
    }

    fn candidate(person_id: i64) -> CandidateRecord {
        CandidateRecord {
            person_id,
            member_id: Some("123456789".to_string()),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            email: None,
        }
    }

    fn store_in(dir: &TempDir) -> Arc<ResultStore> {
        Arc::new(ResultStore::new(&dir.path().join("usa-status.json")))
    }

    #[tokio::test]
    async fn processes_every_pending_record() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set_planned(3).await;
        let factory = Arc::new(ScriptedFactory {
            dead_first: Mutex::new(false),
            opened: AtomicUsize::new(0),
        });

        let scheduler = Scheduler::new(
            fast_settings(),
            SchedulerConfig {
                workers: 2,
                retries: 0,
            },
        );
        let stats = scheduler
            .run(
                factory,
                vec![candidate(1), candidate(2), candidate(3)],
                Arc::clone(&store),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.found, 3);
        let (total, found, not_found) = store.counts().await;
        assert_eq!((total, found, not_found), (3, 3, 0));
    }

    #[tokio::test]
    async fn replaces_a_closed_page_and_continues() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set_planned(3).await;
        let factory = Arc::new(ScriptedFactory {
            dead_first: Mutex::new(true),
            opened: AtomicUsize::new(0),
        });

        let scheduler = Scheduler::new(
            fast_settings(),
            SchedulerConfig {
                workers: 1,
                retries: 0,
            },
        );
        let stats = scheduler
            .run(
                Arc::clone(&factory) as Arc<dyn PageFactory>,
                vec![candidate(1), candidate(2), candidate(3)],
                Arc::clone(&store),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        // first record failed on the dead tab, the rest ran on its successor
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.found, 2);
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
        let (total, _, _) = store.counts().await;
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn cancellation_stops_claiming_new_records() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let factory = Arc::new(ScriptedFactory {
            dead_first: Mutex::new(false),
            opened: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let scheduler = Scheduler::new(
            fast_settings(),
            SchedulerConfig {
                workers: 1,
                retries: 0,
            },
        );
        let stats = scheduler
            .run(factory, vec![candidate(1)], Arc::clone(&store), cancel)
            .await
            .unwrap();

        assert_eq!(stats.processed, 0);
        let (total, _, _) = store.counts().await;
        assert_eq!(total, 0);
    }
}
