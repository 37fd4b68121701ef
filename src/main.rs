use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsletter_courier::delivery::{Engine, EngineConfig, PassOutcome};
use newsletter_courier::lock::{LockConfig, LockManager};
use newsletter_courier::mail::{
    IssueRenderer, MailTransport, NoAttachments, OutgoingEmail, RenderedIssue, SystemClock,
};
use newsletter_courier::persist::CheckpointStore;
use newsletter_courier::registry;
use newsletter_courier::store::JsonStore;
use newsletter_courier::types::Issue;

/// Renders the authored HTML as both bodies.
///
/// Real templating and CSS inlining are provided by the surrounding
/// system; this binary only exercises the delivery engine.
struct RawRenderer;

impl IssueRenderer for RawRenderer {
    fn render(&self, issue: &Issue) -> RenderedIssue {
        RenderedIssue {
            plaintext: issue.html_content.clone(),
            html: issue.html_content.clone(),
        }
    }
}

/// Logs each send instead of talking to an SMTP relay.
struct LogTransport;

impl MailTransport for LogTransport {
    fn send(&self, email: &OutgoingEmail<'_>) -> bool {
        tracing::info!(
            to = %email.recipient.email,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "would send mail (stub transport)"
        );
        true
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsletter_courier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = std::env::var_os("NEWSLETTER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./newsletter-data"));
    let lock = LockManager::new(data_dir.join("delivery.lock"), LockConfig::default());

    let command = std::env::args().nth(1);
    match command.as_deref() {
        Some("force-unlock") => match lock.force_clear() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "failed to clear delivery lock");
                ExitCode::FAILURE
            }
        },
        None | Some("deliver") => deliver(&data_dir, &lock),
        Some(other) => {
            tracing::error!(command = other, "unknown command (expected: deliver, force-unlock)");
            ExitCode::FAILURE
        }
    }
}

fn deliver(data_dir: &std::path::Path, lock: &LockManager) -> ExitCode {
    let mut store = match JsonStore::open(data_dir.join("store.json")) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "failed to open store");
            return ExitCode::FAILURE;
        }
    };

    // Accounts that never confirmed their address are expired before the
    // lock is taken, as an unprotected sweep.
    let activation_timeout = Duration::days(14);
    if let Err(e) = registry::prune_unconfirmed(&mut store, chrono::Utc::now(), activation_timeout)
    {
        tracing::error!(error = %e, "failed to prune unconfirmed accounts");
        return ExitCode::FAILURE;
    }

    let checkpoint = CheckpointStore::new(data_dir.join("checkpoint.json"));
    let config = EngineConfig {
        unsubscribe_url: std::env::var("NEWSLETTER_UNSUBSCRIBE_URL").ok(),
    };

    let mut engine = Engine::new(
        &mut store,
        &RawRenderer,
        &LogTransport,
        &NoAttachments,
        &SystemClock,
        lock,
        &checkpoint,
        config,
    );

    match engine.run_pass() {
        Ok(PassOutcome::AlreadyRunning) => {
            tracing::info!("another delivery pass is running, exiting");
            ExitCode::SUCCESS
        }
        Ok(PassOutcome::Completed(report)) => {
            tracing::info!(?report, "pass complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "delivery pass failed; checkpoint preserved for resume");
            ExitCode::FAILURE
        }
    }
}
