//! Screen-capture authorization handshake
//!
//! The platform shows its own consent prompt, possibly from another process,
//! and reports the outcome later through a notification channel. Each request
//! is tracked in a pending table keyed by request id and handed to the caller
//! as a future that the matching notification resolves.

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifies one authorization request
pub type RequestId = Uuid;

type GrantOutcome = Result<CaptureToken, HandshakeError>;

/// Handshake lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No request in flight and no grant held
    Idle,
    /// The consent prompt is showing
    AwaitingUser,
    /// A token was issued and is still cached
    Granted,
}

/// Failures of the authorization flow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("screen capture permission denied")]
    Denied,
    #[error("an authorization request is already pending")]
    AlreadyPending,
    #[error("authorization request was cancelled")]
    Cancelled,
    #[error("failed to show authorization prompt: {0}")]
    Prompt(String),
}

/// Opaque payload the platform attaches to a grant
#[derive(Clone, Default, PartialEq, Eq)]
pub struct GrantData(Vec<u8>);

impl GrantData {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for GrantData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GrantData({} bytes)", self.0.len())
    }
}

/// Notification delivered by the platform once the user answered the prompt
#[derive(Debug, Clone)]
pub struct GrantNotification {
    pub request_id: RequestId,
    pub granted: bool,
    pub grant_data: GrantData,
}

/// Capability proving screen capture was authorized for this process.
///
/// Only the handshake can mint one. Clones share revocation state.
#[derive(Clone)]
pub struct CaptureToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    id: Uuid,
    grant: GrantData,
    revoked: AtomicBool,
}

impl CaptureToken {
    pub(crate) fn issue(grant: GrantData) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id: Uuid::new_v4(),
                grant,
                revoked: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn grant_data(&self) -> &GrantData {
        &self.inner.grant
    }

    pub fn is_valid(&self) -> bool {
        !self.inner.revoked.load(Ordering::Acquire)
    }

    pub(crate) fn revoke(&self) {
        self.inner.revoked.store(true, Ordering::Release);
    }
}

impl fmt::Debug for CaptureToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureToken")
            .field("id", &self.inner.id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Shows the platform's consent prompt.
///
/// Implementations must eventually hand a [`GrantNotification`] carrying the
/// same `request_id` to `reply`, from any thread.
pub trait AuthorizationPrompt: Send + Sync {
    fn show(&self, request_id: RequestId, reply: GrantNotifier) -> anyhow::Result<()>;
}

struct HandshakeInner {
    state: HandshakeState,
    listeners: HashMap<RequestId, oneshot::Sender<GrantOutcome>>,
    token: Option<CaptureToken>,
}

impl HandshakeInner {
    /// Returns false when a listener for `request_id` already exists
    fn register_listener(&mut self, request_id: RequestId, sender: oneshot::Sender<GrantOutcome>) -> bool {
        match self.listeners.entry(request_id) {
            Entry::Occupied(_) => {
                debug!("Listener for request {} already registered", request_id);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(sender);
                true
            }
        }
    }
}

/// Authorization state machine owned by one capture coordinator
pub struct PermissionHandshake {
    inner: Arc<Mutex<HandshakeInner>>,
    prompt: Arc<dyn AuthorizationPrompt>,
}

impl PermissionHandshake {
    pub fn new(prompt: Arc<dyn AuthorizationPrompt>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HandshakeInner {
                state: HandshakeState::Idle,
                listeners: HashMap::new(),
                token: None,
            })),
            prompt,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.inner.lock().state
    }

    /// Cached token, if a grant is still held
    pub fn token(&self) -> Option<CaptureToken> {
        self.inner.lock().token.clone().filter(CaptureToken::is_valid)
    }

    /// Sender half of the notification channel
    pub fn notifier(&self) -> GrantNotifier {
        GrantNotifier {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Ask for authorization.
    ///
    /// Resolves immediately when a valid token is cached. Otherwise registers
    /// one listener and shows the prompt; only one request may be pending.
    pub fn request(&self) -> Result<PendingGrant, HandshakeError> {
        let request_id = Uuid::new_v4();

        let receiver = {
            let mut inner = self.inner.lock();

            if let Some(token) = inner.token.as_ref().filter(|t| t.is_valid()) {
                debug!("Reusing capture token {}", token.id());
                return Ok(PendingGrant::ready(token.clone()));
            }

            if inner.state == HandshakeState::AwaitingUser {
                return Err(HandshakeError::AlreadyPending);
            }

            let (sender, receiver) = oneshot::channel();
            inner.register_listener(request_id, sender);
            inner.token = None;
            inner.state = HandshakeState::AwaitingUser;
            receiver
        };

        info!("Requesting screen capture authorization ({})", request_id);

        // The prompt may answer synchronously, so the lock must be released here
        if let Err(e) = self.prompt.show(request_id, self.notifier()) {
            warn!("Authorization prompt failed: {:#}", e);
            let mut inner = self.inner.lock();
            inner.listeners.remove(&request_id);
            if inner.state == HandshakeState::AwaitingUser {
                inner.state = HandshakeState::Idle;
            }
            return Err(HandshakeError::Prompt(e.to_string()));
        }

        Ok(PendingGrant::waiting(request_id, receiver))
    }

    /// Invalidate the cached token; the next capture needs a fresh grant
    pub fn revoke(&self) {
        let mut inner = self.inner.lock();
        if let Some(token) = inner.token.take() {
            token.revoke();
            info!("Capture token {} revoked", token.id());
        }
        if inner.state == HandshakeState::Granted {
            inner.state = HandshakeState::Idle;
        }
    }

    /// Teardown: drop every listener without emitting a token and forget the
    /// grant. Pending futures resolve to [`HandshakeError::Cancelled`].
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.listeners.len();
        inner.listeners.clear();
        if let Some(token) = inner.token.take() {
            token.revoke();
        }
        inner.state = HandshakeState::Idle;
        if dropped > 0 {
            info!("Cancelled {} pending authorization request(s)", dropped);
        }
    }
}

/// Delivers platform notifications into the handshake's pending table
#[derive(Clone)]
pub struct GrantNotifier {
    inner: Arc<Mutex<HandshakeInner>>,
}

impl GrantNotifier {
    /// Resolve the listener registered for `notification.request_id`.
    ///
    /// Returns false when no such listener exists (stale, duplicate or
    /// cancelled request); the notification is dropped.
    pub fn deliver(&self, notification: GrantNotification) -> bool {
        let GrantNotification {
            request_id,
            granted,
            grant_data,
        } = notification;

        let mut inner = self.inner.lock();
        let Some(listener) = inner.listeners.remove(&request_id) else {
            warn!("Dropping authorization result for unknown request {}", request_id);
            return false;
        };

        // A grant without payload cannot open a surface
        let outcome = if granted && !grant_data.is_empty() {
            let token = CaptureToken::issue(grant_data);
            info!("Screen capture authorized, token {}", token.id());
            inner.token = Some(token.clone());
            inner.state = HandshakeState::Granted;
            Ok(token)
        } else {
            // The requester learns of the denial through the outcome
            warn!("Screen capture authorization denied ({})", request_id);
            inner.state = HandshakeState::Idle;
            Err(HandshakeError::Denied)
        };
        drop(inner);

        if listener.send(outcome).is_err() {
            debug!("Requester for {} went away before the result arrived", request_id);
        }
        true
    }
}

/// Future resolving to the outcome of one authorization request
pub struct PendingGrant {
    request_id: Option<RequestId>,
    state: GrantState,
}

enum GrantState {
    Ready(Option<CaptureToken>),
    Waiting(oneshot::Receiver<GrantOutcome>),
}

impl PendingGrant {
    fn ready(token: CaptureToken) -> Self {
        Self {
            request_id: None,
            state: GrantState::Ready(Some(token)),
        }
    }

    fn waiting(request_id: RequestId, receiver: oneshot::Receiver<GrantOutcome>) -> Self {
        Self {
            request_id: Some(request_id),
            state: GrantState::Waiting(receiver),
        }
    }

    /// Id of the prompt this future waits on; `None` when a cached token was reused
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }
}

impl Future for PendingGrant {
    type Output = GrantOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            GrantState::Ready(token) => Poll::Ready(token.take().ok_or(HandshakeError::Cancelled)),
            GrantState::Waiting(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(HandshakeError::Cancelled))),
        }
    }
}
