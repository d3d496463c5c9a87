//! Delivery of today's Daily Buffer by email.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::environment::SendMode;
use crate::mail::{build_mail_html, MailTransport};
use crate::profile::ScoringProfile;
use crate::store::{BufferEntry, DailyBuffer};
use crate::{utc_day, TARGET_PIPELINE};

/// Outcome of one send.
#[derive(Debug, Default)]
pub struct SendReport {
    /// Entries picked from today's buffer.
    pub selected: usize,
    /// Entries delivered.
    pub sent: usize,
    /// Entries removed from the buffer afterwards.
    pub pruned: usize,
    /// `(entry id, error)` for individual emails that failed.
    pub failures: Vec<(String, String)>,
}

pub struct DigestSender<'a> {
    pub buffer: &'a DailyBuffer,
    pub transport: &'a dyn MailTransport,
    pub template: &'a str,
    pub profile: &'a ScoringProfile,
    pub max_posts_per_day: usize,
    pub send_mode: SendMode,
    pub include_ai_content: bool,
    pub clear_after_send: bool,
    pub send_workers: usize,
}

impl DigestSender<'_> {
    /// Sends the best `max_posts_per_day` entries dated `now`'s UTC day.
    ///
    /// A digest-mode transport error is returned as is and nothing is pruned.
    /// In individual mode each email stands alone; failures are reported and
    /// their entries stay in the buffer.
    pub async fn send(&self, now: DateTime<Utc>) -> Result<SendReport> {
        let today = utc_day(now);
        let mut entries = self.buffer.entries_for(&today)?;
        let mut report = SendReport::default();
        if entries.is_empty() {
            info!(target: TARGET_PIPELINE, "No entries in today's buffer - nothing to send");
            return Ok(report);
        }

        entries.sort_by(|a, b| b.score.total_cmp(&a.score));
        entries.truncate(self.max_posts_per_day);
        report.selected = entries.len();

        let sent_ids: HashSet<String> = match self.send_mode {
            SendMode::Digest => {
                let title = format!("Daily RSS Digest ({})", today);
                let time_label = format!("{} UTC", self.profile.send_time);
                let html = build_mail_html(
                    self.template,
                    &entries,
                    &title,
                    &time_label,
                    self.include_ai_content,
                );
                self.transport
                    .send(&format!("[NEWSFEED] {}", title), &html)
                    .await?;
                info!(target: TARGET_PIPELINE, "Sent digest with {} entries", entries.len());
                entries.iter().map(|e| e.id.clone()).collect()
            }
            SendMode::Individual => {
                let time_label = now.format("%Y-%m-%d %H:%M UTC").to_string();
                let results: Vec<(String, Result<()>)> = stream::iter(entries.iter())
                    .map(|entry| self.send_one(entry, &time_label))
                    .buffer_unordered(self.send_workers.max(1))
                    .collect()
                    .await;

                let mut sent = HashSet::new();
                for (id, result) in results {
                    match result {
                        Ok(()) => {
                            sent.insert(id);
                        }
                        Err(err) => {
                            warn!(target: TARGET_PIPELINE, "Failed to send {}: {:#}", id, err);
                            report.failures.push((id, format!("{:#}", err)));
                        }
                    }
                }
                info!(
                    target: TARGET_PIPELINE,
                    "Sent {} individual emails (workers={})",
                    sent.len(),
                    self.send_workers
                );
                sent
            }
        };
        report.sent = sent_ids.len();

        if self.clear_after_send && !sent_ids.is_empty() {
            report.pruned = self.buffer.prune_sent(&today, &sent_ids)?;
        }
        Ok(report)
    }

    async fn send_one(&self, entry: &BufferEntry, time_label: &str) -> (String, Result<()>) {
        let title = if entry.title.is_empty() {
            "No title"
        } else {
            entry.title.as_str()
        };
        let html = build_mail_html(
            self.template,
            std::slice::from_ref(entry),
            title,
            time_label,
            self.include_ai_content,
        );
        let subject = format!("[NEWSFEED] [{}] {}", entry.source_key(), title);
        let result = self.transport.send(&subject, &html).await;
        (entry.id.clone(), result)
    }
}
