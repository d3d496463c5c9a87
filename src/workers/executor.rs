use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use super::job::Job;
use crate::content::{simplify_html, ContentFetcher};
use crate::llm::EnrichmentEngine;
use crate::rss::FeedEntry;
use crate::store::{domain_of, BufferEntry, DailyBuffer, FailCache, HistoryLedger};
use crate::TARGET_PIPELINE;

/// How a job turns fetched content into the buffered HTML.
pub enum Enrichment<'a> {
    /// Run the engine with this instruction in the job directory.
    Engine {
        engine: &'a dyn EnrichmentEngine,
        instruction: String,
    },
    /// Buffer the feed summary instead.
    Disabled,
}

/// Counts for one `process` run.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub remaining_global: usize,
    pub scored: usize,
    pub rejected: usize,
    pub candidates: usize,
    pub selected: usize,
    pub succeeded: usize,
    /// `(entry id, error)` for every job that failed.
    pub failures: Vec<(String, String)>,
}

pub struct JobExecutor<'a> {
    pub fetcher: &'a dyn ContentFetcher,
    pub enrichment: Enrichment<'a>,
    pub buffer: &'a DailyBuffer,
    pub history: &'a HistoryLedger,
    pub fail_cache: &'a FailCache,
    pub fail_ttl_seconds: i64,
    /// UTC day whose quota the selection used; every buffered entry is
    /// tagged with it.
    pub buffer_day: String,
}

impl JobExecutor<'_> {
    /// Runs `jobs` with at most `workers` in flight. A successful job is
    /// recorded in History as soon as it finishes; a failed one leaves no
    /// trace beyond the report, so the entry stays eligible.
    pub async fn run_jobs(&self, jobs: Vec<Job>, workers: usize, report: &mut ProcessReport) {
        let mut results = stream::iter(jobs)
            .map(|job| async move {
                let id = job.entry.id.clone();
                let result = self.run_job(job).await;
                (id, result)
            })
            .buffer_unordered(workers.max(1));

        while let Some((id, result)) = results.next().await {
            match result {
                Ok(()) => match self.history.append(&id) {
                    Ok(()) => report.succeeded += 1,
                    Err(err) => {
                        error!(target: TARGET_PIPELINE, "Buffered {} but could not record it in history: {:#}", id, err);
                        report.failures.push((id, format!("{:#}", err)));
                    }
                },
                Err(err) => {
                    warn!(target: TARGET_PIPELINE, "Error while processing {}: {:#}", id, err);
                    report.failures.push((id, format!("{:#}", err)));
                }
            }
        }
    }

    /// Fetch, simplify, enrich and buffer one entry. The job directory is
    /// removed when `job` goes out of scope, whatever the outcome.
    pub async fn run_job(&self, job: Job) -> Result<()> {
        let url = job.entry.url.trim();
        if url.is_empty() {
            bail!("entry {} has no url", job.entry.id);
        }

        let started = Utc::now();
        let now_ts = started.timestamp_millis() as f64 / 1000.0;
        let domain = domain_of(url);
        if let Some(domain) = &domain {
            if self.fail_cache.is_blocked(domain, now_ts, self.fail_ttl_seconds) {
                bail!("Skipping {} - last attempt failed and fail TTL has not expired", domain);
            }
        }

        let markup = match self.fetcher.fetch(url).await {
            Ok(markup) => markup,
            Err(err) => {
                if let Some(domain) = &domain {
                    if let Err(cache_err) = self.fail_cache.remember(domain, now_ts) {
                        warn!(target: TARGET_PIPELINE, "Could not update fail cache: {:#}", cache_err);
                    }
                }
                return Err(err.context(format!("Failed to fetch {}", url)));
            }
        };

        let title = Some(job.entry.title.as_str()).filter(|t| !t.is_empty());
        let simplified = simplify_html(&markup, title, url);
        let content_path = job.dir.path().join("content.html");
        tokio::fs::write(&content_path, simplified)
            .await
            .with_context(|| format!("Failed to write {}", content_path.display()))?;

        let content_html = match &self.enrichment {
            Enrichment::Engine {
                engine,
                instruction,
            } => engine.enrich(job.dir.path(), instruction).await?,
            Enrichment::Disabled => fallback_html(&job.entry),
        };
        if content_html.trim().is_empty() {
            bail!("No content to write to buffer");
        }

        let finished = Utc::now();
        let entry = &job.entry;
        self.buffer.append(&BufferEntry {
            id: entry.id.clone(),
            source: entry.source.clone(),
            title: entry.title.clone(),
            url: entry.url.clone(),
            published: entry.published.clone(),
            summary: entry.summary.clone(),
            content_html,
            score: job.score,
            profile: job.profile_name.clone(),
            date: self.buffer_day.clone(),
            added_at: finished.to_rfc3339(),
        })?;
        info!(target: TARGET_PIPELINE, "Added entry {} to daily buffer", entry.id);
        Ok(())
    }
}

/// Buffered HTML when enrichment is off: the summary, or the start of the
/// content when there is no summary.
pub fn fallback_html(entry: &FeedEntry) -> String {
    let text = if entry.summary.is_empty() && !entry.content.is_empty() {
        let head: String = entry.content.chars().take(500).collect();
        format!("{}...", head)
    } else {
        entry.summary.clone()
    };
    format!("<p>{}</p>", text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utc_day;
    use crate::workers::Job;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeFetcher {
        pages: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        fn new(pages: &[(&str, &str)]) -> Self {
            FakeFetcher {
                pages: pages
                    .iter()
                    .map(|(u, p)| (u.to_string(), p.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ContentFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow!("404 Not Found"))
        }
    }

    /// Echoes back whether it could see the simplified page.
    struct FakeEngine {
        fail: bool,
    }

    #[async_trait]
    impl EnrichmentEngine for FakeEngine {
        async fn enrich(&self, work_dir: &Path, instruction: &str) -> Result<String> {
            if self.fail {
                return Err(anyhow!("model unavailable"));
            }
            let content = std::fs::read_to_string(work_dir.join("content.html"))?;
            assert!(work_dir.join("article.json").exists());
            Ok(format!("<p>{}: {}</p>", instruction, content.len()))
        }
    }

    fn entry(id: &str, url: &str) -> FeedEntry {
        FeedEntry {
            id: id.to_string(),
            source: "blog".to_string(),
            title: format!("Title {id}"),
            url: url.to_string(),
            summary: format!("summary {id}"),
            ..Default::default()
        }
    }

    struct Fixture {
        tmp: tempfile::TempDir,
        buffer: DailyBuffer,
        history: HistoryLedger,
        fail_cache: FailCache,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let fail_cache = FailCache::new(tmp.path().join("tmp/fetch_failures.json"));
            Fixture {
                tmp,
                buffer: DailyBuffer::in_memory(),
                history: HistoryLedger::in_memory(),
                fail_cache,
            }
        }

        fn job(&self, index: usize, entry: FeedEntry) -> Job {
            Job::materialize(self.tmp.path(), index, entry, 2.5, "tech").unwrap()
        }

        fn executor<'a>(&'a self, fetcher: &'a FakeFetcher, enrichment: Enrichment<'a>) -> JobExecutor<'a> {
            JobExecutor {
                fetcher,
                enrichment,
                buffer: &self.buffer,
                history: &self.history,
                fail_cache: &self.fail_cache,
                fail_ttl_seconds: 3600,
                buffer_day: utc_day(Utc::now()),
            }
        }

        fn today(&self) -> Vec<BufferEntry> {
            self.buffer.entries_for(&utc_day(Utc::now())).unwrap()
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_dirs_cleaned() {
        let fx = Fixture::new();
        let fetcher = FakeFetcher::new(&[("https://ok.example.com/a", "<p>hello</p>")]);
        let engine = FakeEngine { fail: false };
        let executor = fx.executor(
            &fetcher,
            Enrichment::Engine {
                engine: &engine,
                instruction: "rewrite".to_string(),
            },
        );

        let jobs = vec![
            fx.job(0, entry("good", "https://ok.example.com/a")),
            fx.job(1, entry("bad", "https://down.example.com/b")),
            fx.job(2, entry("nourl", "")),
        ];
        let dirs: Vec<_> = jobs.iter().map(|j| j.dir.path().to_path_buf()).collect();

        let mut report = ProcessReport::default();
        executor.run_jobs(jobs, 2, &mut report).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures.len(), 2);
        assert!(dirs.iter().all(|d| !d.exists()));

        let ids = fx.history.load_ids().unwrap();
        assert!(ids.contains("good"));
        assert!(!ids.contains("bad") && !ids.contains("nourl"));

        let buffered = fx.today();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].id, "good");
        assert_eq!(buffered[0].score, 2.5);
        assert_eq!(buffered[0].profile, "tech");
        assert!(buffered[0].content_html.starts_with("<p>rewrite: "));

        assert!(fx.fail_cache.load().contains_key("down.example.com"));
    }

    #[tokio::test]
    async fn test_blocked_domain_is_not_fetched() {
        let fx = Fixture::new();
        let now = Utc::now().timestamp() as f64;
        fx.fail_cache.remember("down.example.com", now).unwrap();
        let fetcher = FakeFetcher::new(&[("https://down.example.com/b", "<p>up again</p>")]);
        let executor = fx.executor(&fetcher, Enrichment::Disabled);

        let err = executor
            .run_job(fx.job(0, entry("b", "https://down.example.com/b")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fail TTL"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(fx.today().is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_failure_leaves_entry_eligible() {
        let fx = Fixture::new();
        let fetcher = FakeFetcher::new(&[("https://ok.example.com/a", "<p>hello</p>")]);
        let engine = FakeEngine { fail: true };
        let executor = fx.executor(
            &fetcher,
            Enrichment::Engine {
                engine: &engine,
                instruction: "rewrite".to_string(),
            },
        );
        let job = fx.job(0, entry("a", "https://ok.example.com/a"));
        let dir = job.dir.path().to_path_buf();

        let mut report = ProcessReport::default();
        executor.run_jobs(vec![job], 1, &mut report).await;
        assert_eq!(report.succeeded, 0);
        assert!(report.failures[0].1.contains("model unavailable"));
        assert!(fx.history.load_ids().unwrap().is_empty());
        assert!(fx.today().is_empty());
        assert!(!dir.exists());
        // enrichment failures say nothing about the domain
        assert!(fx.fail_cache.load().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_enrichment_buffers_summary() {
        let fx = Fixture::new();
        let fetcher = FakeFetcher::new(&[("https://ok.example.com/a", "<p>hello</p>")]);
        let executor = fx.executor(&fetcher, Enrichment::Disabled);
        executor
            .run_job(fx.job(0, entry("a", "https://ok.example.com/a")))
            .await
            .unwrap();
        assert_eq!(fx.today()[0].content_html, "<p>summary a</p>");
    }

    #[test]
    fn test_fallback_html() {
        let mut e = entry("x", "");
        assert_eq!(fallback_html(&e), "<p>summary x</p>");
        e.summary.clear();
        e.content = "é".repeat(600);
        assert_eq!(fallback_html(&e), format!("<p>{}...</p>", "é".repeat(500)));
        e.content.clear();
        assert_eq!(fallback_html(&e), "<p></p>");
    }

    #[tokio::test]
    async fn test_entries_take_the_selection_day() {
        let fx = Fixture::new();
        let fetcher = FakeFetcher::new(&[("https://ok.example.com/a", "<p>hello</p>")]);
        let mut executor = fx.executor(&fetcher, Enrichment::Disabled);
        executor.buffer_day = "2024-05-02".to_string();

        executor
            .run_job(fx.job(0, entry("a", "https://ok.example.com/a")))
            .await
            .unwrap();
        let buffered = fx.buffer.entries_for("2024-05-02").unwrap();
        assert_eq!(buffered.len(), 1);
        assert!(!buffered[0].added_at.is_empty());
    }
}
