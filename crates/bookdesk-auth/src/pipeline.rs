//! Session request pipeline.
//!
//! Every outbound call goes through [`SessionPipeline::send`], which attaches
//! the current access token and recovers from a 401 at most once:
//!
//! 1. The first 401 for a request starts recovery. If a refresh exchange is
//!    already in flight the request parks on a oneshot waiter; otherwise it
//!    becomes the refresh leader.
//! 2. The leader runs the exchange on a spawned task, so it always runs to
//!    completion even if the leader's caller goes away.
//! 3. On success the new token is stored, every waiter is resumed in FIFO
//!    order with it, and the state returns to idle in the same critical
//!    section. On failure every waiter is resumed with `None`, the session is
//!    cleared, and [`SessionEvent::Ended`] is broadcast.
//! 4. Each request is replayed at most once. A 401 on the replay is
//!    [`AuthError::AuthFailed`] and ends the session with
//!    [`EndReason::Rejected`].
//!
//! A request whose 401 arrives after a refresh already replaced the token it
//! was sent with is replayed with the current token without a new exchange.
//! One whose 401 arrives after the session ended fails without an exchange.

use std::sync::Arc;

use bookdesk_core::{RecordStore, load_record, remove_record, save_record};
use bookdesk_settings::ApiSettings;
use parking_lot::Mutex;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::backend;
use crate::errors::AuthError;
use crate::events::{EndReason, SessionEvent};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::types::{Session, SessionRecord, User};

/// Session event channel capacity.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Authenticated API client with single-flight token refresh.
///
/// Cheap to clone; clones share the session, refresh state and event channel.
#[derive(Clone)]
pub struct SessionPipeline {
    shared: Arc<Shared>,
}

struct Shared {
    transport: Arc<dyn HttpTransport>,
    api: ApiSettings,
    store: Arc<dyn RecordStore>,
    state: Mutex<PipelineState>,
    events: broadcast::Sender<SessionEvent>,
}

struct PipelineState {
    session: Session,
    refresh: RefreshState,
    /// Bumped whenever the session is replaced by sign-in or teardown.
    generation: u64,
}

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<Option<String>>>,
    },
}

/// What a request that hit a 401 does next.
enum Recovery {
    /// The token was replaced while the request was in flight.
    Replay(String),
    /// The session ended while the request was in flight.
    Ended,
    /// Another request is running the exchange.
    Wait(oneshot::Receiver<Option<String>>),
    /// This request runs the exchange for the given session generation.
    Lead(u64),
}

impl SessionPipeline {
    /// Create a pipeline, restoring the session persisted in `store`.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        api: ApiSettings,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let session = load_record::<SessionRecord>(store.as_ref())
            .map(Session::from)
            .unwrap_or_default();
        debug!(
            authenticated = session.is_authenticated(),
            owner = session.owner_key().unwrap_or("-"),
            "session restored"
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                transport,
                api,
                store,
                state: Mutex::new(PipelineState {
                    session,
                    refresh: RefreshState::Idle,
                    generation: 0,
                }),
                events,
            }),
        }
    }

    /// API settings the pipeline resolves paths against.
    pub fn api(&self) -> &ApiSettings {
        &self.shared.api
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.shared.state.lock().session.clone()
    }

    /// Current access token.
    pub fn access_token(&self) -> Option<String> {
        self.shared.state.lock().session.access_token.clone()
    }

    /// Current identity.
    pub fn identity(&self) -> Option<User> {
        self.shared.state.lock().session.identity.clone()
    }

    /// Whether a refresh exchange is in flight.
    pub fn is_refreshing(&self) -> bool {
        matches!(
            self.shared.state.lock().refresh,
            RefreshState::Refreshing { .. }
        )
    }

    /// Number of requests parked behind the in-flight refresh.
    pub fn pending_requests(&self) -> usize {
        match &self.shared.state.lock().refresh {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Attach the current access token as a bearer credential.
    ///
    /// Without a token the request is returned unchanged.
    pub fn attach(&self, request: HttpRequest) -> HttpRequest {
        with_bearer(request, self.access_token().as_deref())
    }

    /// Dispatch a request, recovering once from an expired access token.
    ///
    /// Responses with any status other than 401 are returned unchanged.
    /// Transport failures propagate without retry.
    #[tracing::instrument(skip_all, fields(method = ?request.method, url = %request.url))]
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        let sent_with = self.access_token();
        match self.shared.dispatch(&request, sent_with.as_deref()).await {
            Err(AuthError::AuthExpired) => {}
            other => return other,
        }

        let token = self.shared.recover(sent_with.as_deref()).await?;

        debug!("replaying request with refreshed token");
        match self.shared.dispatch(&request, Some(&token)).await {
            Err(AuthError::AuthExpired) => {
                warn!("request rejected again after refresh, ending session");
                let _ = self.shared.end_session(EndReason::Rejected);
                Err(AuthError::AuthFailed(
                    "request rejected after credential refresh".to_string(),
                ))
            }
            other => other,
        }
    }

    /// [`send`](Self::send), then decode a 2xx JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, AuthError> {
        let resp = self.send(request).await?;
        if !resp.is_success() {
            return Err(AuthError::Status {
                status: resp.status,
                body: resp.body,
            });
        }
        Ok(resp.json()?)
    }

    /// `GET` an API path and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        self.send_json(HttpRequest::get(self.shared.api.url(path)))
            .await
    }

    /// Complete a sign-in with a token and identity obtained elsewhere.
    pub fn sign_in(&self, access_token: String, user: User) {
        {
            let mut state = self.shared.state.lock();
            state.session = Session {
                access_token: Some(access_token),
                identity: Some(user.clone()),
            };
            state.generation += 1;
            self.shared.persist(&state.session);
        }
        info!(user_id = %user.id, "session established");
        self.shared.emit(SessionEvent::Established { user });
    }

    /// Sign in against the backend with email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let (token, user) =
            backend::login(self.shared.transport.as_ref(), &self.shared.api, email, password)
                .await?;
        self.sign_in(token, user.clone());
        Ok(user)
    }

    /// Clear the session locally and broadcast [`EndReason::SignedOut`].
    ///
    /// Signing out of an empty session emits nothing.
    pub fn sign_out(&self) {
        if self.shared.end_session(EndReason::SignedOut) {
            info!("signed out");
        }
    }

    /// Notify the backend (best effort), then [`sign_out`](Self::sign_out).
    pub async fn logout(&self) {
        let token = self.access_token();
        if let Err(e) =
            backend::logout(self.shared.transport.as_ref(), &self.shared.api, token.as_deref())
                .await
        {
            warn!("backend logout failed: {e}");
        }
        self.sign_out();
    }
}

impl Shared {
    /// Send once. A 401 becomes [`AuthError::AuthExpired`].
    async fn dispatch(
        &self,
        request: &HttpRequest,
        token: Option<&str>,
    ) -> Result<HttpResponse, AuthError> {
        let resp = self
            .transport
            .send(with_bearer(request.clone(), token))
            .await?;
        if resp.status == 401 {
            debug!("access token rejected");
            return Err(AuthError::AuthExpired);
        }
        Ok(resp)
    }

    /// Obtain a token to replay with after a 401.
    async fn recover(self: &Arc<Self>, sent_with: Option<&str>) -> Result<String, AuthError> {
        let recovery = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let current = state.session.access_token.as_deref();
            if sent_with.is_some() && current.is_none() {
                Recovery::Ended
            } else if let Some(current) = current.filter(|t| Some(*t) != sent_with) {
                Recovery::Replay(current.to_string())
            } else if let RefreshState::Refreshing { waiters } = &mut state.refresh {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                debug!(queued = waiters.len(), "refresh in flight, queueing request");
                Recovery::Wait(rx)
            } else {
                state.refresh = RefreshState::Refreshing {
                    waiters: Vec::new(),
                };
                Recovery::Lead(state.generation)
            }
        };

        match recovery {
            Recovery::Replay(token) => {
                debug!("token already refreshed, skipping exchange");
                Ok(token)
            }
            Recovery::Ended => {
                debug!("session ended while request was in flight");
                Err(AuthError::AuthFailed(
                    "session ended while request was in flight".to_string(),
                ))
            }
            Recovery::Wait(rx) => match rx.await {
                Ok(Some(token)) => Ok(token),
                Ok(None) | Err(_) => Err(AuthError::AuthFailed(
                    "credential refresh failed".to_string(),
                )),
            },
            Recovery::Lead(generation) => {
                let shared = Arc::clone(self);
                tokio::spawn(async move { shared.complete_refresh(generation).await })
                    .await
                    .unwrap_or_else(|e| {
                        Err(AuthError::AuthFailed(format!("refresh task aborted: {e}")))
                    })
            }
        }
    }

    /// Run the refresh exchange and settle every waiter.
    ///
    /// If the session was replaced while the exchange ran, its result is
    /// dropped and waiters resume with whatever token the session now holds.
    async fn complete_refresh(&self, generation: u64) -> Result<String, AuthError> {
        info!("starting refresh exchange");
        let outcome = backend::refresh_access_token(self.transport.as_ref(), &self.api).await;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.generation != generation {
            let current = state.session.access_token.clone();
            let resumed = drain_waiters(&mut state.refresh, current.as_deref());
            drop(guard);
            info!(resumed, "session replaced during refresh, discarding result");
            return current.ok_or_else(|| {
                AuthError::AuthFailed("session ended during credential refresh".to_string())
            });
        }

        match outcome {
            Ok(grant) => {
                state.session.access_token = Some(grant.access_token.clone());
                let identity_event = match grant.user {
                    Some(user) if state.session.identity.as_ref() != Some(&user) => {
                        state.session.identity = Some(user.clone());
                        Some(SessionEvent::Established { user })
                    }
                    _ => None,
                };
                self.persist(&state.session);
                let resumed = drain_waiters(&mut state.refresh, Some(grant.access_token.as_str()));
                drop(guard);

                info!(resumed, "access token refreshed");
                if let Some(event) = identity_event {
                    self.emit(event);
                }
                Ok(grant.access_token)
            }
            Err(e) => {
                let failed = drain_waiters(&mut state.refresh, None);
                let ended = clear_session(self, state);
                drop(guard);

                warn!(failed, "refresh exchange failed: {e}");
                if ended {
                    self.emit(SessionEvent::Ended {
                        reason: EndReason::RefreshFailed,
                    });
                }
                Err(AuthError::AuthFailed(format!(
                    "credential refresh failed: {e}"
                )))
            }
        }
    }

    /// Clear the session and broadcast [`SessionEvent::Ended`].
    ///
    /// Returns `false`, and emits nothing, if the session was already empty.
    fn end_session(&self, reason: EndReason) -> bool {
        let ended = clear_session(self, &mut self.state.lock());
        if ended {
            self.emit(SessionEvent::Ended { reason });
        }
        ended
    }

    /// Write-through to the record store. Called with the state lock held so
    /// writes land in transition order.
    fn persist(&self, session: &Session) {
        let result = if session == &Session::default() {
            remove_record::<SessionRecord>(self.store.as_ref())
        } else {
            save_record(self.store.as_ref(), &SessionRecord::from(session))
        };
        if let Err(e) = result {
            warn!("failed to persist session: {e}");
        }
    }

    fn emit(&self, event: SessionEvent) {
        debug!(event_type = event.event_type(), "emitting session event");
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

/// Reset the session under the state lock. Returns `false` if it was
/// already empty.
fn clear_session(shared: &Shared, state: &mut PipelineState) -> bool {
    if state.session == Session::default() {
        return false;
    }
    state.session = Session::default();
    state.generation += 1;
    shared.persist(&state.session);
    true
}

/// Resolve every parked request in FIFO order, then return to idle.
fn drain_waiters(refresh: &mut RefreshState, token: Option<&str>) -> usize {
    let mut resumed = 0;
    if let RefreshState::Refreshing { waiters } = refresh {
        for waiter in waiters.drain(..) {
            // A dropped receiver means the caller went away
            let _ = waiter.send(token.map(str::to_string));
            resumed += 1;
        }
    }
    *refresh = RefreshState::Idle;
    resumed
}

fn with_bearer(mut request: HttpRequest, token: Option<&str>) -> HttpRequest {
    if let Some(token) = token {
        request.set_header(AUTHORIZATION.as_str(), format!("Bearer {token}"));
    }
    request
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
