//! Token lifecycle manager.
//!
//! Owns the persisted [`Session`] and hands out access tokens that stay valid
//! long enough to use.
//!
//! ## Refresh protocol
//!
//! Refreshes are single-flight. The first caller of [`TokenLifecycleManager::refresh`]
//! starts one network round trip (bounded by `refresh_timeout`); every caller
//! arriving while it is outstanding is parked as a waiter and receives the same
//! outcome. Outcomes are settled under the state lock, so no caller ever sees
//! an intermediate token.
//!
//! | Outcome                         | Session  | Waiters            |
//! |---------------------------------|----------|--------------------|
//! | new grant                       | replaced | resolved, same token |
//! | rejected (400/401/500)          | cleared, user notified once | rejected |
//! | timeout / network / bad payload | kept     | rejected           |
//!
//! ## Renewal
//!
//! Every stored token set (re)arms a single-shot timer at
//! `max(1s, time_until_expiry - 5min)`. The timer is cancelled on logout and
//! while suspended, and re-armed on resume from the persisted session.

use crate::events::{LifecycleEvent, UserNotice};
use crate::identity::{IdentityProvider, TvPairingRequest};
use crate::session_state::{SessionState, SessionStateHandle};
use crate::timer::TimerSlot;
use crate::token::{Session, TokenGrant};
use crate::token_fsm::{TokenMachine, TokenMachineInput, TokenMachineState};
use crate::{SessionError, SessionResult};
use chrono::Utc;
use credential_store::{CredentialVault, StorageError, StorageKeys};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

/// Near-expiry threshold used before sending an API request.
pub const REQUEST_TOKEN_THRESHOLD: Duration = Duration::from_secs(10);

/// Near-expiry threshold used by boot/foreground liveness checks.
pub const LIVENESS_TOKEN_THRESHOLD: Duration = Duration::from_secs(60);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Upper bound on one refresh round trip.
    pub refresh_timeout: Duration,
    /// How long before expiry the renewal timer fires.
    pub renewal_lead: Duration,
    /// Floor for the renewal delay.
    pub min_renewal_delay: Duration,
    /// Threshold for [`TokenLifecycleManager::valid_token`].
    pub liveness_threshold: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(10),
            renewal_lead: Duration::from_secs(5 * 60),
            min_renewal_delay: Duration::from_secs(1),
            liveness_threshold: LIVENESS_TOKEN_THRESHOLD,
        }
    }
}

/// Delay before the proactive refresh for a token with `remaining` lifetime.
pub fn renewal_delay(remaining: Duration, config: &LifecycleConfig) -> Duration {
    remaining
        .saturating_sub(config.renewal_lead)
        .max(config.min_renewal_delay)
}

type RefreshOutcome = SessionResult<String>;

/// A caller parked on the in-flight refresh.
struct RefreshWaiter {
    tx: oneshot::Sender<RefreshOutcome>,
}

impl RefreshWaiter {
    fn settle(self, outcome: &RefreshOutcome) {
        // Receiver gone means the caller stopped waiting.
        let _ = self.tx.send(outcome.clone());
    }
}

struct LifecycleState {
    machine: TokenMachine,
    /// Id of the outstanding refresh, if any.
    flight: Option<u64>,
    next_flight: u64,
    waiters: Vec<RefreshWaiter>,
    consecutive_failures: u32,
    /// The session-expired notice was already shown for this session.
    logout_notified: bool,
    suspended: bool,
}

struct Inner {
    vault: CredentialVault,
    provider: Arc<dyn IdentityProvider>,
    config: LifecycleConfig,
    state: Mutex<LifecycleState>,
    session_state: SessionStateHandle,
    events: broadcast::Sender<LifecycleEvent>,
    notices: broadcast::Sender<UserNotice>,
    renewal: TimerSlot,
}

/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    inner: Arc<Inner>,
}

impl TokenLifecycleManager {
    pub fn new(
        vault: CredentialVault,
        provider: Arc<dyn IdentityProvider>,
        config: LifecycleConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (notices, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                vault,
                provider,
                config,
                state: Mutex::new(LifecycleState {
                    machine: TokenMachine::new(),
                    flight: None,
                    next_flight: 0,
                    waiters: Vec::new(),
                    consecutive_failures: 0,
                    logout_notified: false,
                    suspended: false,
                }),
                session_state: SessionStateHandle::default(),
                events,
                notices,
                renewal: TimerSlot::new(),
            }),
        }
    }

    // ==========================================
    // Observation
    // ==========================================

    pub fn session_state(&self) -> SessionState {
        self.inner.session_state.current()
    }

    /// Authentication changes. Dropping the receiver unsubscribes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.session_state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Messages meant for a toast surface.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<UserNotice> {
        self.inner.notices.subscribe()
    }

    pub fn machine_state(&self) -> TokenMachineState {
        *self.inner.state.lock().machine.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.machine_state() != TokenMachineState::LoggedOut
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().flight.is_some()
    }

    pub fn is_renewal_armed(&self) -> bool {
        self.inner.renewal.is_armed()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.state.lock().consecutive_failures
    }

    // ==========================================
    // Accessors
    // ==========================================

    /// The stored session, if logged in.
    pub fn current_session(&self) -> SessionResult<Option<Session>> {
        if !self.is_authenticated() {
            return Ok(None);
        }
        self.load_session()
    }

    /// The stored access token as-is, without any expiry check.
    pub fn current_token(&self) -> SessionResult<Option<String>> {
        Ok(self
            .current_session()?
            .map(|session| session.tokens.access_token))
    }

    /// Access token with more than `threshold` lifetime left, refreshing
    /// first when it is closer to expiry.
    pub async fn get_valid_token(&self, threshold: Duration) -> SessionResult<String> {
        let session = self.current_session()?.ok_or(SessionError::NoSession)?;

        if session.tokens.expires_within(threshold, Utc::now()) {
            debug!(
                threshold_secs = threshold.as_secs(),
                "Access token near expiry, refreshing"
            );
            return self.refresh().await;
        }
        Ok(session.tokens.access_token)
    }

    /// [`get_valid_token`](Self::get_valid_token) with the liveness threshold.
    pub async fn valid_token(&self) -> SessionResult<String> {
        self.get_valid_token(self.inner.config.liveness_threshold)
            .await
    }

    // ==========================================
    // Sign-in and restore
    // ==========================================

    /// Load the persisted session at startup and publish the result.
    ///
    /// Returns whether a session is active afterwards. A token that is about
    /// to expire is refreshed first; a transient refresh failure keeps the
    /// session.
    pub async fn restore(&self) -> SessionResult<bool> {
        let Some(session) = self.load_session()? else {
            {
                let mut state = self.inner.state.lock();
                Self::transition(&mut state, TokenMachineInput::Logout)?;
                self.inner.session_state.end_session();
            }
            info!("No stored session");
            return Ok(false);
        };

        let epoch = self.activate(&session)?;
        info!(epoch, expires_at = ?session.tokens.expires_at, "Restored stored session");

        self.refresh_if_expiring(&session).await?;
        Ok(self.is_authenticated())
    }

    /// Store a fresh grant from a sign-in and publish a new session epoch.
    pub fn establish_session(&self, grant: TokenGrant) -> SessionResult<Session> {
        let session = Session::from_grant(grant, Utc::now())?;
        self.inner
            .vault
            .set_json(StorageKeys::AUTH_DATA, &session)?;

        let epoch = self.activate(&session)?;
        info!(epoch, expires_at = ?session.tokens.expires_at, "Session established");
        Ok(session)
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> SessionResult<Session> {
        self.inner.session_state.set_transitioning(true);
        let result = match self.inner.provider.sign_in(email, password).await {
            Ok(grant) => self.establish_session(grant),
            Err(err) => Err(SessionError::from_sign_in(err)),
        };
        self.finish_sign_in(result)
    }

    pub async fn sign_in_with_tv_code(
        &self,
        request: &TvPairingRequest,
    ) -> SessionResult<Session> {
        self.inner.session_state.set_transitioning(true);
        let result = match self.inner.provider.validate_tv_code(request).await {
            Ok(grant) => self.establish_session(grant),
            Err(err) => Err(SessionError::from_sign_in(err)),
        };
        self.finish_sign_in(result)
    }

    fn finish_sign_in(&self, result: SessionResult<Session>) -> SessionResult<Session> {
        if let Err(err) = &result {
            warn!(error = %err, "Sign-in failed");
            self.inner.session_state.set_transitioning(false);
        }
        result
    }

    /// Mark `session` as the live one: FSM to Idle, new epoch, renewal armed.
    /// Callers parked on a superseded refresh get the new token.
    fn activate(&self, session: &Session) -> SessionResult<u64> {
        let (epoch, waiters) = {
            let mut state = self.inner.state.lock();
            Self::transition(&mut state, TokenMachineInput::SessionEstablished)?;
            state.flight = None;
            state.consecutive_failures = 0;
            state.logout_notified = false;

            let epoch = self.inner.session_state.begin_session();
            self.arm_renewal_locked(&state, session);
            (epoch, std::mem::take(&mut state.waiters))
        };

        let outcome = Ok(session.tokens.access_token.clone());
        for waiter in waiters {
            waiter.settle(&outcome);
        }
        Ok(epoch)
    }

    // ==========================================
    // Refresh
    // ==========================================

    /// Refresh the access token, joining the in-flight refresh if there is one.
    pub async fn refresh(&self) -> SessionResult<String> {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.flight.is_none() {
                self.begin_flight_locked(&mut state)?;
            } else {
                debug!(waiters = state.waiters.len() + 1, "Joining in-flight refresh");
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(RefreshWaiter { tx });
            rx
        };

        // Sender dropped without settling only when the manager is torn down.
        rx.await.unwrap_or(Err(SessionError::NoSession))
    }

    fn begin_flight_locked(&self, state: &mut LifecycleState) -> SessionResult<()> {
        if *state.machine.state() == TokenMachineState::LoggedOut {
            return Err(SessionError::NoSession);
        }
        let session = self.load_session()?.ok_or(SessionError::NoSession)?;
        let Some(refresh_token) = session.tokens.refresh_token else {
            warn!("Stored session has no refresh token");
            let _ = self
                .inner
                .events
                .send(LifecycleEvent::refresh_failed(&SessionError::NoRefreshToken));
            return Err(SessionError::NoRefreshToken);
        };

        Self::transition(state, TokenMachineInput::RefreshStarted)?;
        state.next_flight += 1;
        let flight = state.next_flight;
        state.flight = Some(flight);

        self.inner.session_state.set_transitioning(true);
        let _ = self.inner.events.send(LifecycleEvent::RefreshStarted);
        info!(flight, "Refreshing access token");

        let manager = self.clone();
        tokio::spawn(async move { manager.run_flight(flight, refresh_token).await });
        Ok(())
    }

    async fn run_flight(self, flight: u64, refresh_token: String) {
        let timeout = self.inner.config.refresh_timeout;
        let outcome =
            match tokio::time::timeout(timeout, self.inner.provider.refresh(&refresh_token)).await
            {
                Ok(Ok(grant)) => Ok(grant),
                Ok(Err(err)) => Err(SessionError::from(err)),
                Err(_) => {
                    warn!(timeout_secs = timeout.as_secs(), "Token refresh timed out");
                    Err(SessionError::RefreshTimeout)
                }
            };
        self.settle_flight(flight, outcome);
    }

    fn settle_flight(&self, flight: u64, outcome: SessionResult<TokenGrant>) {
        let mut state = self.inner.state.lock();
        if state.flight != Some(flight) {
            debug!(flight, "Discarding outcome of superseded refresh");
            return;
        }
        state.flight = None;

        let result = match outcome.and_then(|grant| self.store_refreshed(grant)) {
            Ok(session) => {
                Self::transition(&mut state, TokenMachineInput::RefreshSucceeded).ok();
                state.consecutive_failures = 0;
                self.inner.session_state.set_transitioning(false);
                self.arm_renewal_locked(&state, &session);

                info!(expires_at = ?session.tokens.expires_at, "Access token refreshed");
                let _ = self.inner.events.send(LifecycleEvent::Refreshed {
                    expires_at: session.tokens.expires_at,
                });
                Ok(session.tokens.access_token)
            }
            Err(err) if err.is_rejection() => {
                warn!(error = %err, "Refresh token rejected, logging out");
                Self::transition(&mut state, TokenMachineInput::RefreshRejected).ok();
                let _ = self.inner.events.send(LifecycleEvent::refresh_failed(&err));
                self.logout_locked(&mut state, true);
                Err(err)
            }
            Err(SessionError::NoSession) => {
                warn!("Session record vanished during refresh, logging out");
                self.logout_locked(&mut state, false);
                Err(SessionError::NoSession)
            }
            Err(err) => {
                state.consecutive_failures += 1;
                warn!(
                    error = %err,
                    consecutive_failures = state.consecutive_failures,
                    "Token refresh failed"
                );
                Self::transition(&mut state, TokenMachineInput::RefreshFailed).ok();
                self.inner.session_state.set_transitioning(false);
                let _ = self.inner.events.send(LifecycleEvent::refresh_failed(&err));
                Err(err)
            }
        };

        let waiters = std::mem::take(&mut state.waiters);
        drop(state);

        debug!(waiters = waiters.len(), ok = result.is_ok(), "Settling refresh waiters");
        for waiter in waiters {
            waiter.settle(&result);
        }
    }

    fn store_refreshed(&self, grant: TokenGrant) -> SessionResult<Session> {
        let current = self.load_session()?.ok_or(SessionError::NoSession)?;
        let next = current.refreshed(grant, Utc::now())?;
        self.inner.vault.set_json(StorageKeys::AUTH_DATA, &next)?;
        Ok(next)
    }

    async fn refresh_if_expiring(&self, session: &Session) -> SessionResult<()> {
        let threshold = self.inner.config.liveness_threshold;
        if !session.tokens.expires_within(threshold, Utc::now()) {
            return Ok(());
        }

        info!("Stored token near expiry, refreshing");
        match self.refresh().await {
            Ok(_) => Ok(()),
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Refresh failed, keeping session");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // ==========================================
    // Logout
    // ==========================================

    /// Clear the session and publish unauthenticated.
    ///
    /// Safe to call repeatedly; only the first call is visible to observers.
    /// With `notify_user`, a session-expired notice is emitted unless one was
    /// already shown for this session.
    pub fn force_logout(&self, notify_user: bool) {
        let waiters = {
            let mut state = self.inner.state.lock();
            self.logout_locked(&mut state, notify_user);
            std::mem::take(&mut state.waiters)
        };

        let outcome = Err(SessionError::NoSession);
        for waiter in waiters {
            waiter.settle(&outcome);
        }
    }

    fn logout_locked(&self, state: &mut LifecycleState, notify_user: bool) {
        if let Err(e) = self.inner.vault.delete(StorageKeys::AUTH_DATA) {
            warn!(error = %e, "Failed to clear stored session");
        }
        self.inner.renewal.cancel();

        if *state.machine.state() != TokenMachineState::LoggedOut {
            Self::transition(state, TokenMachineInput::Logout).ok();
        }
        state.flight = None;
        state.consecutive_failures = 0;

        if self.inner.session_state.end_session() {
            info!("Session ended");
            let _ = self.inner.events.send(LifecycleEvent::LoggedOut);
        }

        if notify_user && !state.logout_notified {
            state.logout_notified = true;
            let _ = self.inner.notices.send(UserNotice::session_expired());
        }
    }

    // ==========================================
    // Process lifecycle
    // ==========================================

    /// The process went to the background: stop the renewal timer.
    pub fn suspend(&self) {
        let mut state = self.inner.state.lock();
        state.suspended = true;
        if self.inner.renewal.cancel() {
            debug!("Renewal timer cancelled for suspend");
        }
    }

    /// The process is in the foreground again: re-arm renewal from the
    /// persisted session and refresh if the token is close to expiry.
    pub async fn resume(&self) -> SessionResult<()> {
        let session = {
            let mut state = self.inner.state.lock();
            state.suspended = false;
            if *state.machine.state() == TokenMachineState::LoggedOut {
                return Ok(());
            }
            match self.load_session()? {
                Some(session) => {
                    self.arm_renewal_locked(&state, &session);
                    session
                }
                None => {
                    warn!("Stored session disappeared while suspended");
                    self.logout_locked(&mut state, false);
                    return Ok(());
                }
            }
        };

        self.refresh_if_expiring(&session).await
    }

    /// Stop background work. Outstanding refreshes still settle.
    pub fn shutdown(&self) {
        self.inner.renewal.cancel();
    }

    // ==========================================
    // Internals
    // ==========================================

    fn load_session(&self) -> SessionResult<Option<Session>> {
        match self.inner.vault.get_json::<Session>(StorageKeys::AUTH_DATA) {
            Ok(session) => Ok(session),
            Err(StorageError::Serialization(e)) => {
                warn!(error = %e, "Discarding unreadable session record");
                self.inner.vault.delete(StorageKeys::AUTH_DATA)?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn arm_renewal_locked(&self, state: &LifecycleState, session: &Session) {
        if state.suspended {
            debug!("Suspended, renewal not armed");
            return;
        }
        let Some(remaining) = session.tokens.remaining(Utc::now()) else {
            self.inner.renewal.cancel();
            debug!("Token expiry unknown, renewal not armed");
            return;
        };

        let delay = renewal_delay(remaining, &self.inner.config);
        let weak = Arc::downgrade(&self.inner);
        self.inner.renewal.arm(delay, async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = TokenLifecycleManager { inner };
            debug!("Renewal timer fired");
            if let Err(err) = manager.refresh().await {
                warn!(error = %err, "Scheduled token refresh failed");
            }
        });

        debug!(delay_ms = delay.as_millis() as u64, "Token renewal scheduled");
        let _ = self
            .inner
            .events
            .send(LifecycleEvent::RenewalScheduled { delay });
    }

    fn transition(state: &mut LifecycleState, input: TokenMachineInput) -> SessionResult<()> {
        let old_state = *state.machine.state();
        state.machine.consume(&input).map_err(|_| {
            SessionError::InvalidTransition(format!("{input:?} from {old_state:?}"))
        })?;
        debug!(
            old_state = ?old_state,
            new_state = ?state.machine.state(),
            "Token state transition"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProviderError, ProviderResult};
    use async_trait::async_trait;
    use credential_store::{CredentialStore, MemoryCredentialStore};
    use futures_util::future::join_all;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Scripted {
        Grant(TokenGrant),
        Fail(ProviderError),
        Hang,
    }

    /// Refresh returns `access-N` / `refresh-N` with a one hour TTL unless a
    /// scripted outcome is queued.
    #[derive(Default)]
    struct FakeProvider {
        calls: AtomicUsize,
        latency: Duration,
        script: Mutex<VecDeque<Scripted>>,
    }

    impl FakeProvider {
        fn with_latency(latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                latency,
                ..Self::default()
            })
        }

        fn then(self: &Arc<Self>, outcome: Scripted) -> Arc<Self> {
            self.script.lock().push_back(outcome);
            self.clone()
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn sign_in(&self, _email: &str, _password: &str) -> ProviderResult<TokenGrant> {
            Ok(TokenGrant::new("signed-in", Some("r0".to_string())).with_expires_in(3600.0))
        }

        async fn validate_tv_code(&self, _request: &TvPairingRequest) -> ProviderResult<TokenGrant> {
            Err(ProviderError::Rejected {
                status: 400,
                message: "Invalid code".to_string(),
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> ProviderResult<TokenGrant> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.latency).await;
            let next = self.script.lock().pop_front();
            match next {
                Some(Scripted::Grant(grant)) => Ok(grant),
                Some(Scripted::Fail(err)) => Err(err),
                Some(Scripted::Hang) => std::future::pending().await,
                None => Ok(TokenGrant::new(format!("access-{n}"), Some(format!("refresh-{n}")))
                    .with_expires_in(3600.0)),
            }
        }
    }

    fn manager_with(provider: Arc<FakeProvider>) -> TokenLifecycleManager {
        let vault = CredentialVault::new(Arc::new(MemoryCredentialStore::new()));
        TokenLifecycleManager::new(vault, provider, LifecycleConfig::default())
    }

    fn grant_expiring_in(secs: f64) -> TokenGrant {
        TokenGrant::new("initial", Some("r0".to_string())).with_expires_in(secs)
    }

    fn rejected() -> ProviderError {
        ProviderError::Rejected {
            status: 401,
            message: "refresh token expired".to_string(),
        }
    }

    #[test]
    fn test_renewal_delay() {
        let config = LifecycleConfig::default();
        assert_eq!(
            renewal_delay(Duration::from_secs(3600), &config),
            Duration::from_secs(3300)
        );
        assert_eq!(
            renewal_delay(Duration::from_secs(61), &config),
            Duration::from_secs(1)
        );
        assert_eq!(renewal_delay(Duration::ZERO, &config), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let provider = FakeProvider::with_latency(Duration::from_millis(100));
        let manager = manager_with(provider.clone());
        manager.establish_session(grant_expiring_in(5.0)).unwrap();

        let results = join_all(
            (0..8).map(|_| manager.get_valid_token(REQUEST_TOKEN_THRESHOLD)),
        )
        .await;

        assert_eq!(provider.calls(), 1);
        for result in results {
            assert_eq!(result, Ok("access-1".to_string()));
        }
        assert_eq!(manager.machine_state(), TokenMachineState::Idle);
        assert_eq!(manager.current_token().unwrap().as_deref(), Some("access-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_rejection() {
        let provider = FakeProvider::with_latency(Duration::from_millis(100)).then(Scripted::Fail(rejected()));
        let manager = manager_with(provider.clone());
        let mut notices = manager.subscribe_notices();
        manager.establish_session(grant_expiring_in(5.0)).unwrap();

        let results = join_all((0..5).map(|_| manager.refresh())).await;

        assert_eq!(provider.calls(), 1);
        for result in &results {
            assert_eq!(result, &results[0]);
            assert!(matches!(result, Err(SessionError::RefreshRejected { status: 401, .. })));
        }
        assert_eq!(manager.current_session().unwrap(), None);
        assert!(!manager.session_state().authenticated);
        assert!(!manager.is_renewal_armed());
        assert_eq!(notices.try_recv().unwrap(), UserNotice::session_expired());
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_ttl_settles_with_unknown_expiry() {
        let provider = FakeProvider::with_latency(Duration::ZERO).then(Scripted::Grant(
            TokenGrant::new("huge", Some("r1".to_string())).with_expires_in(1e19),
        ));
        let manager = manager_with(provider.clone());
        manager.establish_session(grant_expiring_in(3600.0)).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), manager.refresh())
            .await
            .expect("refresh settled");
        assert_eq!(first, Ok("huge".to_string()));
        assert_eq!(manager.machine_state(), TokenMachineState::Idle);
        assert!(!manager.session_state().transitioning);
        let session = manager.current_session().unwrap().unwrap();
        assert_eq!(session.tokens.expires_at, None);
        assert!(!manager.is_renewal_armed());

        assert_eq!(manager.refresh().await, Ok("access-2".to_string()));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout_keeps_session() {
        let provider = FakeProvider::with_latency(Duration::ZERO).then(Scripted::Hang);
        let manager = manager_with(provider.clone());
        manager.establish_session(grant_expiring_in(3600.0)).unwrap();

        let result = manager.refresh().await;

        assert_eq!(result, Err(SessionError::RefreshTimeout));
        assert_eq!(manager.machine_state(), TokenMachineState::Idle);
        assert!(manager.session_state().authenticated);
        assert!(!manager.session_state().transitioning);
        assert_eq!(manager.current_token().unwrap().as_deref(), Some("initial"));
        assert_eq!(manager.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_keeps_session() {
        let provider = FakeProvider::with_latency(Duration::ZERO)
            .then(Scripted::Fail(ProviderError::Network("offline".to_string())));
        let manager = manager_with(provider);
        manager.establish_session(grant_expiring_in(3600.0)).unwrap();

        let result = manager.refresh().await;

        assert!(matches!(result, Err(SessionError::NetworkUnavailable(_))));
        assert!(manager.session_state().authenticated);

        // Next attempt succeeds and clears the failure count.
        assert_eq!(manager.refresh().await, Ok("access-2".to_string()));
        assert_eq!(manager.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_ttl_renewal_fires_within_one_second() {
        let provider = FakeProvider::with_latency(Duration::ZERO);
        let manager = manager_with(provider.clone());
        manager.establish_session(grant_expiring_in(61.0)).unwrap();
        assert!(manager.is_renewal_armed());

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(provider.calls(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(provider.calls(), 1);
        assert_eq!(manager.current_token().unwrap().as_deref(), Some("access-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_fires_five_minutes_before_expiry() {
        let provider = FakeProvider::with_latency(Duration::ZERO);
        let manager = manager_with(provider.clone());
        manager.establish_session(grant_expiring_in(3600.0)).unwrap();

        tokio::time::sleep(Duration::from_secs(3290)).await;
        assert_eq!(provider.calls(), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_force_logout_twice_is_one_transition() {
        let manager = manager_with(FakeProvider::with_latency(Duration::ZERO));
        let mut events = manager.subscribe_events();
        let mut notices = manager.subscribe_notices();
        manager.establish_session(grant_expiring_in(3600.0)).unwrap();

        let mut state_rx = manager.subscribe_state();
        state_rx.borrow_and_update();

        manager.force_logout(true);
        assert!(state_rx.has_changed().unwrap());
        assert!(!state_rx.borrow_and_update().authenticated);
        assert_eq!(
            manager.get_valid_token(REQUEST_TOKEN_THRESHOLD).await,
            Err(SessionError::NoSession)
        );

        manager.force_logout(true);
        assert!(!state_rx.has_changed().unwrap());
        assert_eq!(
            manager.get_valid_token(REQUEST_TOKEN_THRESHOLD).await,
            Err(SessionError::NoSession)
        );

        assert!(notices.try_recv().is_ok());
        assert!(notices.try_recv().is_err());

        let mut logged_out = 0;
        while let Ok(event) = events.try_recv() {
            if event == LifecycleEvent::LoggedOut {
                logged_out += 1;
            }
        }
        assert_eq!(logged_out, 1);
    }

    #[tokio::test]
    async fn test_new_sign_in_re_enables_notice() {
        let manager = manager_with(FakeProvider::with_latency(Duration::ZERO));
        let mut notices = manager.subscribe_notices();

        manager.establish_session(grant_expiring_in(3600.0)).unwrap();
        manager.force_logout(true);
        manager.establish_session(grant_expiring_in(3600.0)).unwrap();
        manager.force_logout(true);

        assert!(notices.try_recv().is_ok());
        assert!(notices.try_recv().is_ok());
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_without_session() {
        let provider = FakeProvider::with_latency(Duration::ZERO);
        let manager = manager_with(provider.clone());

        assert_eq!(manager.refresh().await, Err(SessionError::NoSession));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let provider = FakeProvider::with_latency(Duration::ZERO);
        let manager = manager_with(provider.clone());
        manager
            .establish_session(TokenGrant::new("a", None).with_expires_in(3600.0))
            .unwrap();

        assert_eq!(manager.refresh().await, Err(SessionError::NoRefreshToken));
        assert_eq!(provider.calls(), 0);
        assert!(manager.session_state().authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_settling_after_logout_is_discarded() {
        let provider = FakeProvider::with_latency(Duration::from_secs(1));
        let manager = manager_with(provider.clone());
        manager.establish_session(grant_expiring_in(3600.0)).unwrap();

        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.is_refreshing());

        manager.force_logout(false);
        assert_eq!(pending.await.unwrap(), Err(SessionError::NoSession));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(provider.calls(), 1);
        assert_eq!(manager.current_session().unwrap(), None);
        assert!(!manager.session_state().authenticated);
    }

    #[tokio::test]
    async fn test_suspend_and_resume_toggle_renewal() {
        let manager = manager_with(FakeProvider::with_latency(Duration::ZERO));
        manager.establish_session(grant_expiring_in(3600.0)).unwrap();
        assert!(manager.is_renewal_armed());

        manager.suspend();
        assert!(!manager.is_renewal_armed());

        manager.resume().await.unwrap();
        assert!(manager.is_renewal_armed());
    }

    #[tokio::test]
    async fn test_restore_loads_persisted_session() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let provider = FakeProvider::with_latency(Duration::ZERO);

        let first = TokenLifecycleManager::new(
            CredentialVault::new(store.clone()),
            provider.clone(),
            LifecycleConfig::default(),
        );
        first.establish_session(grant_expiring_in(3600.0)).unwrap();
        first.shutdown();

        let second = TokenLifecycleManager::new(
            CredentialVault::new(store),
            provider.clone(),
            LifecycleConfig::default(),
        );
        assert_eq!(second.session_state(), SessionState::booting());
        assert!(second.restore().await.unwrap());
        assert_eq!(second.session_state(), SessionState::authenticated(1));
        assert_eq!(second.current_token().unwrap().as_deref(), Some("initial"));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_refreshes_near_expiry_token() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let provider = FakeProvider::with_latency(Duration::ZERO);
        let vault = CredentialVault::new(store);
        let session = Session::from_grant(grant_expiring_in(30.0), Utc::now()).unwrap();
        vault.set_json(StorageKeys::AUTH_DATA, &session).unwrap();

        let manager =
            TokenLifecycleManager::new(vault, provider.clone(), LifecycleConfig::default());
        assert!(manager.restore().await.unwrap());
        assert_eq!(provider.calls(), 1);
        assert_eq!(manager.current_token().unwrap().as_deref(), Some("access-1"));
    }

    #[tokio::test]
    async fn test_restore_without_session() {
        let manager = manager_with(FakeProvider::with_latency(Duration::ZERO));
        assert!(!manager.restore().await.unwrap());
        assert_eq!(manager.session_state(), SessionState::signed_out(0));
    }

    #[tokio::test]
    async fn test_restore_discards_corrupt_record() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.set(StorageKeys::AUTH_DATA, "{not json").unwrap();
        let manager = TokenLifecycleManager::new(
            CredentialVault::new(store.clone()),
            FakeProvider::with_latency(Duration::ZERO),
            LifecycleConfig::default(),
        );

        assert!(!manager.restore().await.unwrap());
        assert!(!store.has(StorageKeys::AUTH_DATA).unwrap());
    }

    #[tokio::test]
    async fn test_sign_in_starts_new_epoch() {
        let manager = manager_with(FakeProvider::with_latency(Duration::ZERO));

        manager.sign_in_with_password("viewer@example.com", "pw").await.unwrap();
        assert_eq!(manager.session_state(), SessionState::authenticated(1));

        manager.force_logout(false);
        manager.sign_in_with_password("viewer@example.com", "pw").await.unwrap();
        assert_eq!(manager.session_state(), SessionState::authenticated(2));
        assert_eq!(manager.current_token().unwrap().as_deref(), Some("signed-in"));
    }

    #[tokio::test]
    async fn test_rejected_pairing_code_leaves_logged_out() {
        let manager = manager_with(FakeProvider::with_latency(Duration::ZERO));
        manager.restore().await.unwrap();

        let request = TvPairingRequest {
            device: crate::DeviceDescriptor::tv("tv-1", "Living Room"),
            code_verifier: "WRONG".to_string(),
        };
        let result = manager.sign_in_with_tv_code(&request).await;

        assert!(matches!(result, Err(SessionError::SignInRejected { status: 400, .. })));
        assert_eq!(manager.session_state(), SessionState::signed_out(0));
    }
}
