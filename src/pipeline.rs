//! The `download`, `process`, `send` and `run` steps plus the maintenance
//! commands, wired to the on-disk project layout.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, Utc};
use std::collections::HashSet;
use std::fs;
use tracing::{info, warn};

use crate::content::{ContentFetcher, HttpContentFetcher};
use crate::digest::{DigestSender, SendReport};
use crate::environment::Config;
use crate::llm::{CommandEnrichment, EnrichmentEngine};
use crate::mail::{load_template, MailTransport, SmtpMailer};
use crate::paths::Paths;
use crate::profile::{choose_profile, load_profiles};
use crate::rss::{download_all, load_sources, DownloadReport, FeedFetcher, HttpFeedFetcher};
use crate::selector::CandidateSelector;
use crate::store::{DailyBuffer, DayLock, FailCache, FeedStore, HistoryLedger, RecordLog};
use crate::workers::{materialize_jobs, Enrichment, JobExecutor, ProcessReport};
use crate::{utc_day, TARGET_PIPELINE};

/// Fetches every configured source into the Feed Store.
pub async fn download(paths: &Paths, cfg: &Config) -> Result<DownloadReport> {
    download_with(paths, cfg, &HttpFeedFetcher).await
}

pub async fn download_with(
    paths: &Paths,
    cfg: &Config,
    fetcher: &dyn FeedFetcher,
) -> Result<DownloadReport> {
    let sources = load_sources(&paths.sources_file)?;
    let store = FeedStore::new(&paths.feeds_dir);
    info!(target: TARGET_PIPELINE, "Downloading {} sources (workers={})", sources.len(), cfg.feed_download_workers);
    let report = download_all(&store, &sources, fetcher, cfg.feed_download_workers).await;
    info!(
        target: TARGET_PIPELINE,
        "Download finished: {} new entries, {} sources failed",
        report.entries_added,
        report.failures.len()
    );
    Ok(report)
}

/// Selects today's entries and runs them through fetch, simplify and
/// enrichment into the Daily Buffer.
pub async fn process(paths: &Paths, cfg: &Config) -> Result<ProcessReport> {
    let fetcher = HttpContentFetcher::new()?;
    let engine = if cfg.include_ai_content {
        Some(CommandEnrichment::new(&cfg.enrich_command, &paths.root)?)
    } else {
        None
    };
    process_with(
        paths,
        cfg,
        &fetcher,
        engine.as_ref().map(|e| e as &dyn EnrichmentEngine),
        Utc::now(),
    )
    .await
}

pub async fn process_with(
    paths: &Paths,
    cfg: &Config,
    fetcher: &dyn ContentFetcher,
    engine: Option<&dyn EnrichmentEngine>,
    now: DateTime<Utc>,
) -> Result<ProcessReport> {
    let profiles = load_profiles(&paths.profile_file)?;
    let profile = choose_profile(&profiles, cfg.profile_name.as_deref())?;

    let enrichment = match engine {
        Some(engine) => {
            let instruction = fs::read_to_string(&paths.prompt_file).with_context(|| {
                format!("Missing prompt file {}", paths.prompt_file.display())
            })?;
            Enrichment::Engine {
                engine,
                instruction,
            }
        }
        None => Enrichment::Disabled,
    };

    let history = HistoryLedger::open(&paths.history_path);
    let buffer = DailyBuffer::open(&paths.daily_buffer);
    let fail_cache = FailCache::new(&paths.fail_cache);
    let store = FeedStore::new(&paths.feeds_dir);

    let logs = store.logs()?;
    if logs.is_empty() {
        warn!(target: TARGET_PIPELINE, "No files found in {}. Run download first.", paths.feeds_dir.display());
        return Ok(ProcessReport::default());
    }

    let selector = CandidateSelector {
        profile,
        history: &history,
        buffer: &buffer,
        max_posts_per_day: cfg.max_posts_per_day,
        now,
    };
    let selection = selector.select(&logs)?;

    let mut report = ProcessReport {
        remaining_global: selection.remaining_global,
        scored: selection.scored,
        rejected: selection.rejected,
        candidates: selection.candidates,
        selected: selection.selected.len(),
        ..Default::default()
    };
    if selection.quota_exhausted() {
        info!(target: TARGET_PIPELINE, "Today's MAX_POSTS_PER_DAY limit is already used - nothing to do.");
        return Ok(report);
    }
    if selection.selected.is_empty() {
        info!(target: TARGET_PIPELINE, "No candidate fits the thresholds or daily/per-source limits.");
        return Ok(report);
    }

    let jobs = materialize_jobs(&paths.process_root, selection.selected, &profile.name)?;
    info!(target: TARGET_PIPELINE, "Processing {} entries (workers={})", jobs.len(), cfg.process_workers);

    let executor = JobExecutor {
        fetcher,
        enrichment,
        buffer: &buffer,
        history: &history,
        fail_cache: &fail_cache,
        fail_ttl_seconds: cfg.fail_ttl_seconds,
        buffer_day: utc_day(now),
    };
    executor.run_jobs(jobs, cfg.process_workers, &mut report).await;

    info!(
        target: TARGET_PIPELINE,
        "Processed {} entries: {} buffered, {} failed",
        report.selected,
        report.succeeded,
        report.failures.len()
    );
    Ok(report)
}

/// Emails today's Daily Buffer.
pub async fn send(paths: &Paths, cfg: &Config) -> Result<SendReport> {
    let transport = SmtpMailer::from_config(cfg)?;
    send_with(paths, cfg, &transport, Utc::now()).await
}

pub async fn send_with(
    paths: &Paths,
    cfg: &Config,
    transport: &dyn MailTransport,
    now: DateTime<Utc>,
) -> Result<SendReport> {
    let profiles = load_profiles(&paths.profile_file)?;
    let profile = choose_profile(&profiles, cfg.profile_name.as_deref())?;
    let template = load_template(&paths.email_template)?;
    let buffer = DailyBuffer::open(&paths.daily_buffer);

    let sender = DigestSender {
        buffer: &buffer,
        transport,
        template: &template,
        profile,
        max_posts_per_day: cfg.max_posts_per_day,
        send_mode: cfg.send_mode,
        include_ai_content: cfg.include_ai_content,
        clear_after_send: cfg.clear_buffer_after_send,
        send_workers: cfg.send_workers,
    };
    let report = sender.send(now).await?;
    if !report.failures.is_empty() {
        let ids: Vec<&str> = report.failures.iter().map(|(id, _)| id.as_str()).collect();
        return Err(anyhow!(
            "{} of {} emails failed to send ({})",
            report.failures.len(),
            report.selected,
            ids.join(", ")
        ));
    }
    Ok(report)
}

#[derive(Debug)]
pub enum RunOutcome {
    /// The day lock already names today.
    AlreadyRan(String),
    Completed(String),
}

/// External collaborators of a full `run`.
pub struct RunDeps<'a> {
    pub feeds: &'a dyn FeedFetcher,
    pub pages: &'a dyn ContentFetcher,
    /// `None` buffers feed summaries instead of enriched HTML.
    pub engine: Option<&'a dyn EnrichmentEngine>,
    /// Required when `AUTO_SEND_DIGEST` is on.
    pub mail: Option<&'a dyn MailTransport>,
}

/// Full daily pipeline, at most once per local calendar day.
pub async fn run(paths: &Paths, cfg: &Config) -> Result<RunOutcome> {
    let today = Local::now().format("%Y-%m-%d").to_string();
    if DayLock::new(&paths.day_lock).already_ran(&today) {
        return Ok(already_ran(today));
    }

    let pages = HttpContentFetcher::new()?;
    let engine = if cfg.include_ai_content {
        Some(CommandEnrichment::new(&cfg.enrich_command, &paths.root)?)
    } else {
        None
    };
    let mailer = if cfg.auto_send_digest {
        Some(SmtpMailer::from_config(cfg)?)
    } else {
        None
    };
    let deps = RunDeps {
        feeds: &HttpFeedFetcher,
        pages: &pages,
        engine: engine.as_ref().map(|e| e as &dyn EnrichmentEngine),
        mail: mailer.as_ref().map(|m| m as &dyn MailTransport),
    };
    run_with(paths, cfg, &today, deps, Utc::now()).await
}

/// `run` with explicit collaborators. `today` is the day-lock date; `now`
/// drives selection and the digest day.
pub async fn run_with(
    paths: &Paths,
    cfg: &Config,
    today: &str,
    deps: RunDeps<'_>,
    now: DateTime<Utc>,
) -> Result<RunOutcome> {
    let lock = DayLock::new(&paths.day_lock);
    if lock.already_ran(today) {
        return Ok(already_ran(today.to_string()));
    }

    download_with(paths, cfg, deps.feeds).await?;
    process_with(paths, cfg, deps.pages, deps.engine, now).await?;
    if cfg.auto_send_digest {
        let mail = deps
            .mail
            .ok_or_else(|| anyhow!("AUTO_SEND_DIGEST is on but no mail transport is configured"))?;
        send_with(paths, cfg, mail, now).await?;
    }

    lock.mark(today)?;
    info!(target: TARGET_PIPELINE, "Saved day.lock = {}", today);
    Ok(RunOutcome::Completed(today.to_string()))
}

fn already_ran(today: String) -> RunOutcome {
    info!(target: TARGET_PIPELINE, "day.lock={} - already ran today, skipping.", today);
    RunOutcome::AlreadyRan(today)
}

/// Records every stored entry id in History without processing anything.
/// Returns `(added, seen)`.
pub fn mark_all(paths: &Paths) -> Result<(usize, usize)> {
    let history = HistoryLedger::open(&paths.history_path);
    let mut processed: HashSet<String> = history.load_ids()?;
    let store = FeedStore::new(&paths.feeds_dir);

    let mut added = 0;
    let mut seen = 0;
    for (_, log) in store.logs()? {
        for entry in log.scan()? {
            seen += 1;
            if entry.id.is_empty() || processed.contains(&entry.id) {
                continue;
            }
            history.append(&entry.id)?;
            processed.insert(entry.id);
            added += 1;
        }
    }
    Ok((added, seen))
}

/// Deletes the fail cache. Returns false when there was none.
pub fn purge_cache(paths: &Paths) -> Result<bool> {
    FailCache::new(&paths.fail_cache).purge()
}

/// Raw view of the Daily Buffer file.
#[derive(Debug, PartialEq)]
pub struct BufferPreview {
    pub total: usize,
    pub lines: Vec<String>,
}

/// The first `limit` lines of the Daily Buffer, or `None` when it does not
/// exist yet.
pub fn show_buffer(paths: &Paths, limit: usize) -> Result<Option<BufferPreview>> {
    if !paths.daily_buffer.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&paths.daily_buffer)
        .with_context(|| format!("Failed to read {}", paths.daily_buffer.display()))?;
    let lines: Vec<&str> = raw.lines().collect();
    Ok(Some(BufferPreview {
        total: lines.len(),
        lines: lines.iter().take(limit).map(|l| l.to_string()).collect(),
    }))
}
