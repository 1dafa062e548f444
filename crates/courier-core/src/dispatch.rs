//! The dispatch engine: a single recurring poller that converts due
//! scheduled jobs into sent email.
//!
//! One `Dispatcher` instance owns the loop. Each cycle claims at most
//! `batch_size` due jobs and works them sequentially, so outbound send
//! concurrency is bounded at one and content-id generation stays trivially
//! unique. Cycles may overlap in wall-clock time (a slow send can outlast
//! the poll interval) but never in job ownership: the claim only matches
//! `pending` rows, and a claimed job is `processing`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use email_gateway::{fetch_remote_images, sender_address, MailTransport, OutboundEmail};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::model::{EmailSendOutcome, JobStatus, NewHistoryRecord, ScheduledEmailJob};
use crate::store;

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Time between poll cycles.
    pub poll_interval: Duration,

    /// Maximum jobs claimed per cycle.
    pub batch_size: i64,

    /// `processing` rows untouched for this long are assumed orphaned by a
    /// dead dispatcher and flipped back to `pending`.
    pub stale_after: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 10,
            stale_after: Duration::from_secs(15 * 60),
        }
    }
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Due jobs that were no longer `pending` by the time we tried to claim
    /// them (cancelled, or taken by an overlapping cycle).
    pub skipped: usize,
    pub reclaimed: u64,
}

/// The scheduled-email poller. Construct once at startup, [`Dispatcher::start`]
/// it, and keep the handle for shutdown.
pub struct Dispatcher {
    pool: SqlitePool,
    transport: Arc<dyn MailTransport>,
    http: reqwest::Client,
    config: DispatcherConfig,
}

/// Handle to a running dispatcher loop.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop the loop and wait for the in-flight cycle to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl Dispatcher {
    pub fn new(
        pool: SqlitePool,
        transport: Arc<dyn MailTransport>,
        http: reqwest::Client,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            pool,
            transport,
            http,
            config,
        }
    }

    /// Spawn the poll loop: one cycle immediately, then one per interval.
    pub fn start(self) -> DispatcherHandle {
        let (tx, mut rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(
                interval_secs = self.config.poll_interval.as_secs(),
                batch_size = self.config.batch_size,
                "dispatcher started"
            );

            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(stats) if stats.claimed > 0 || stats.reclaimed > 0 => {
                                info!(
                                    sent = stats.sent,
                                    failed = stats.failed,
                                    skipped = stats.skipped,
                                    reclaimed = stats.reclaimed,
                                    "dispatch cycle complete"
                                );
                            }
                            Ok(_) => {}
                            // Store connectivity loss: the cycle aborts, the
                            // next tick retries the same query.
                            Err(e) => error!(error = %e, "dispatch cycle aborted"),
                        }
                    }
                    _ = rx.changed() => {
                        info!("dispatcher stopped");
                        break;
                    }
                }
            }
        });

        DispatcherHandle { shutdown: tx, task }
    }

    /// One poll cycle. Public so tests can drive the engine without timers.
    pub async fn run_once(&self) -> Result<CycleStats, sqlx::Error> {
        let now = Utc::now();
        let mut stats = CycleStats::default();

        let cutoff = now
            - chrono::Duration::from_std(self.config.stale_after)
                .unwrap_or_else(|_| chrono::Duration::minutes(15));
        stats.reclaimed = store::reclaim_stale(&self.pool, cutoff).await?;
        if stats.reclaimed > 0 {
            warn!(count = stats.reclaimed, "reclaimed stale processing jobs");
        }

        let due = store::find_due(&self.pool, now, self.config.batch_size).await?;
        for job in due {
            // The exclusion gate: only one claimant ever sees `pending`.
            let claimed = store::update_status(
                &self.pool,
                job.id,
                JobStatus::Pending,
                JobStatus::Processing,
                None,
                None,
            )
            .await?;

            if !claimed {
                debug!(job_id = job.id, "job no longer pending, skipping");
                stats.skipped += 1;
                continue;
            }
            stats.claimed += 1;

            // Re-read after the claim: an edit may have landed between the
            // poll query and the claim, and the send must use it.
            let job = match store::get_job(&self.pool, job.id, None).await? {
                Some(job) => job,
                None => {
                    warn!(job_id = job.id, "claimed job disappeared, skipping");
                    continue;
                }
            };

            self.process_claimed(&job, &mut stats).await?;
        }

        Ok(stats)
    }

    /// Send one claimed job and record its terminal state. Send failures
    /// land in `failed` and never propagate; store failures do.
    async fn process_claimed(
        &self,
        job: &ScheduledEmailJob,
        stats: &mut CycleStats,
    ) -> Result<(), sqlx::Error> {
        let recipients = job.recipients();
        let from = sender_address(&job.from_email, job.from_name.as_deref());

        let outcome = render_and_send(
            self.transport.as_ref(),
            &self.http,
            from,
            recipients.clone(),
            &job.subject,
            &job.html_content,
        )
        .await;

        let now = Utc::now();
        if outcome.success {
            store::update_status(
                &self.pool,
                job.id,
                JobStatus::Processing,
                JobStatus::Sent,
                Some(now),
                None,
            )
            .await?;
            stats.sent += 1;
            info!(job_id = job.id, message_id = ?outcome.message_id, "scheduled email sent");
        } else {
            store::update_status(
                &self.pool,
                job.id,
                JobStatus::Processing,
                JobStatus::Failed,
                Some(now),
                Some(&outcome.message),
            )
            .await?;
            stats.failed += 1;
            warn!(job_id = job.id, error = %outcome.message, "scheduled email failed");
        }

        store::append_history(
            &self.pool,
            &NewHistoryRecord {
                user_id: job.user_id,
                scheduled_email_id: Some(job.id),
                to_email: recipients,
                subject: job.subject.clone(),
                from_email: job.from_email.clone(),
                from_name: job.from_name.clone(),
                outcome,
            },
        )
        .await
    }
}

/// Sanitize, resolve remote images, and send one email. Shared by the
/// dispatcher and the immediate-send API path; every failure mode is folded
/// into the returned outcome.
pub async fn render_and_send(
    transport: &dyn MailTransport,
    http: &reqwest::Client,
    from: String,
    to: Vec<String>,
    subject: &str,
    html: &str,
) -> EmailSendOutcome {
    if to.is_empty() {
        return EmailSendOutcome {
            success: false,
            message: "no valid recipients after normalization".to_string(),
            message_id: None,
            stats: Default::default(),
        };
    }

    let sanitized = html_inline::sanitize(html);
    let stats = sanitized.stats;

    let mut inline_images = sanitized.inline_images;
    inline_images.extend(fetch_remote_images(http, &sanitized.remote_images).await);

    let email = OutboundEmail {
        from,
        to,
        reply_to: None,
        subject: subject.to_string(),
        html: Some(sanitized.html),
        text: Some(sanitized.text),
        inline_images,
        attachments: vec![],
    };

    match transport.send(&email).await {
        Ok(receipt) => EmailSendOutcome {
            success: true,
            message: "sent".to_string(),
            message_id: Some(receipt.message_id),
            stats,
        },
        Err(e) => EmailSendOutcome {
            success: false,
            message: e.to_string(),
            message_id: None,
            stats,
        },
    }
}
