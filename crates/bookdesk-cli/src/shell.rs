//! Command handlers.
//!
//! The shell owns one [`SessionPipeline`] and one [`WorkspaceCache`] sharing a
//! record store. After every command it drains the pipeline's session events
//! and rebinds the cache, so a sign-in, sign-out or failed refresh is reflected
//! in the cache before the process exits.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bookdesk_auth::{EndReason, ReqwestTransport, SessionEvent, SessionPipeline, User};
use bookdesk_core::{FileRecordStore, RecordStore};
use bookdesk_settings::ClientSettings;
use bookdesk_workspaces::{ApiMembershipSource, RefreshOutcome, WorkspaceCache};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Command;

/// Client state for one process.
pub struct Shell {
    pipeline: SessionPipeline,
    cache: WorkspaceCache,
    events: broadcast::Receiver<SessionEvent>,
    stale_time: Duration,
}

impl Shell {
    /// Open the client with records stored under `data_dir`.
    pub fn open(settings: &ClientSettings, data_dir: &Path) -> Result<Self> {
        let store: Arc<dyn RecordStore> = Arc::new(FileRecordStore::new(data_dir));
        let transport = Arc::new(
            ReqwestTransport::from_settings(&settings.api).context("Failed to build HTTP client")?,
        );
        let pipeline = SessionPipeline::new(transport, settings.api.clone(), store.clone());
        let source = Arc::new(ApiMembershipSource::new(pipeline.clone()));
        let cache = WorkspaceCache::new(source, store);
        Ok(Self::from_parts(pipeline, cache, settings.cache.stale_time()))
    }

    fn from_parts(pipeline: SessionPipeline, cache: WorkspaceCache, stale_time: Duration) -> Self {
        let events = pipeline.subscribe();
        // Records from an earlier run can disagree if it exited mid-command
        let owner = pipeline.session().owner_key().map(str::to_string);
        if cache.bind_to_user(owner.as_deref()) {
            debug!("cache rebound to restored session");
        }
        Self {
            pipeline,
            cache,
            events,
            stale_time,
        }
    }

    /// Run one command, writing user-facing output to `out`.
    pub async fn run(
        &mut self,
        command: Command,
        cancel: &CancellationToken,
        out: &mut dyn Write,
    ) -> Result<()> {
        let result = match command {
            Command::Login { email, password } => self.login(&email, &password, out).await,
            Command::Logout => self.logout(out).await,
            Command::Whoami => self.whoami(out),
            Command::Workspaces { force } => self.workspaces(force, cancel, out).await,
            Command::Select { id } => self.select(&id, out),
        };
        self.apply_events(out)?;
        result
    }

    async fn login(&self, email: &str, password: &str, out: &mut dyn Write) -> Result<()> {
        let user = self
            .pipeline
            .login(email, password)
            .await
            .context("Sign-in failed")?;
        writeln!(out, "Signed in as {}", display_user(&user))?;
        Ok(())
    }

    async fn logout(&self, out: &mut dyn Write) -> Result<()> {
        if !self.pipeline.session().is_authenticated() {
            writeln!(out, "Not signed in")?;
            return Ok(());
        }
        self.pipeline.logout().await;
        writeln!(out, "Signed out")?;
        Ok(())
    }

    fn whoami(&self, out: &mut dyn Write) -> Result<()> {
        match self.pipeline.identity() {
            Some(user) => writeln!(out, "{}", display_user(&user))?,
            None => writeln!(out, "Not signed in")?,
        }
        Ok(())
    }

    async fn workspaces(
        &self,
        force: bool,
        cancel: &CancellationToken,
        out: &mut dyn Write,
    ) -> Result<()> {
        if !self.pipeline.session().is_authenticated() {
            writeln!(out, "Not signed in. Run `bookdesk login` first.")?;
            return Ok(());
        }

        let outcome = if force {
            self.cache.hard_refresh(Some(cancel)).await
        } else {
            self.cache.refresh_if_stale(self.stale_time, Some(cancel)).await
        }
        .context("Failed to load workspaces")?;
        debug!(?outcome, force, "workspace refresh finished");
        if let RefreshOutcome::Discarded(reason) = outcome {
            writeln!(out, "Workspace refresh abandoned ({reason:?})")?;
            return Ok(());
        }

        let entry = self.cache.snapshot();
        if entry.list.is_empty() {
            writeln!(out, "No workspaces")?;
        }
        for workspace in &entry.list {
            let marker = if entry.current_id.as_deref() == Some(workspace.id.as_str()) {
                '*'
            } else {
                ' '
            };
            writeln!(out, "{marker} {}  {}", workspace.id, workspace.name)?;
        }
        Ok(())
    }

    fn select(&self, id: &str, out: &mut dyn Write) -> Result<()> {
        if self.cache.owner_key().is_none() {
            writeln!(out, "Not signed in")?;
            return Ok(());
        }
        self.cache.set_current(Some(id));
        if self.cache.snapshot().contains(id) {
            writeln!(out, "Selected {id}")?;
        } else {
            writeln!(
                out,
                "Selected {id} (not in the cached list; checked on the next refresh)"
            )?;
        }
        Ok(())
    }

    /// Forward queued session events to the cache.
    fn apply_events(&mut self, out: &mut dyn Write) -> Result<()> {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    let _ = self.cache.bind_to_user(event.owner_key());
                    if matches!(
                        event,
                        SessionEvent::Ended { reason } if reason != EndReason::SignedOut
                    ) {
                        writeln!(
                            out,
                            "Your session has ended. Sign in again with `bookdesk login`."
                        )?;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed session events, resyncing cache owner");
                    let owner = self.pipeline.session().owner_key().map(str::to_string);
                    let _ = self.cache.bind_to_user(owner.as_deref());
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            }
        }
    }
}

fn display_user(user: &User) -> String {
    match (&user.name, &user.email) {
        (Some(name), Some(email)) => format!("{name} <{email}>"),
        (None, Some(email)) => email.clone(),
        (Some(name), None) => name.clone(),
        (None, None) => user.id.clone(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
