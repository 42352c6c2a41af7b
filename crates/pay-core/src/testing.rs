//! Test doubles for the adapter and notification seams.
//!
//! Enabled for unit tests and, through the `testing` feature, for
//! downstream crates' tests.

use crate::adapter::{
    CheckoutSession, ProviderAdapter, Resolution, ResolvedStatus, SessionOutcome, SessionUrls,
    StatusQuery,
};
use crate::cart::{Cart, PaymentProvider};
use crate::error::{NotificationError, PaymentError, PaymentResult};
use crate::event::{EventKind, PaymentEvent};
use crate::notify::{Letter, Mailer, WebhookSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Header a [`FakeAdapter`] requires on callbacks
pub const FAKE_SIGNATURE_HEADER: &str = "x-fake-signature";
pub const FAKE_SIGNATURE_OK: &str = "valid";

#[derive(Debug, Clone, Copy)]
enum FakeFailure {
    Unavailable,
    Rejected,
}

#[derive(Debug)]
struct Script {
    resolution: Resolution,
    failure: Option<FakeFailure>,
    delay: Option<Duration>,
}

/// Scriptable provider adapter.
///
/// Sessions are `fake_sess_{n}`; status queries return the scripted
/// [`Resolution`] (UNKNOWN until set). Callbacks must carry
/// `x-fake-signature: valid`.
#[derive(Debug, Clone)]
pub struct FakeAdapter {
    provider: PaymentProvider,
    active: bool,
    script: Arc<Mutex<Script>>,
    create_calls: Arc<AtomicUsize>,
    resolve_calls: Arc<AtomicUsize>,
}

impl FakeAdapter {
    pub fn new(provider: PaymentProvider) -> Self {
        Self {
            provider,
            active: true,
            script: Arc::new(Mutex::new(Script {
                resolution: Resolution::new(ResolvedStatus::Unknown),
                failure: None,
                delay: None,
            })),
            create_calls: Arc::new(AtomicUsize::new(0)),
            resolve_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.active = false;
        self
    }

    /// Script the next status answers
    pub fn resolve_to(&self, resolution: Resolution) {
        self.script.lock().resolution = resolution;
    }

    pub fn fail_unavailable(&self) {
        self.script.lock().failure = Some(FakeFailure::Unavailable);
    }

    pub fn fail_rejected(&self) {
        self.script.lock().failure = Some(FakeFailure::Rejected);
    }

    pub fn delay(&self, delay: Duration) {
        self.script.lock().delay = Some(delay);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    fn current(&self) -> (Resolution, Option<FakeFailure>, Option<Duration>) {
        let script = self.script.lock();
        (script.resolution.clone(), script.failure, script.delay)
    }

    fn fail(&self, failure: FakeFailure) -> PaymentError {
        match failure {
            FakeFailure::Unavailable => {
                PaymentError::unavailable(self.provider.as_str(), "scripted outage")
            }
            FakeFailure::Rejected => {
                PaymentError::rejected(self.provider.as_str(), "scripted rejection")
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn create_session(
        &self,
        cart: &Cart,
        _urls: &SessionUrls,
    ) -> PaymentResult<SessionOutcome> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.active {
            return Ok(SessionOutcome::Disabled);
        }
        let (_, failure, delay) = self.current();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = failure {
            return Err(self.fail(failure));
        }
        let id = format!("fake_sess_{}", n);
        let url = format!("https://checkout.fake/{}?cart={}", id, cart.id);
        Ok(SessionOutcome::Opened(CheckoutSession::new(id, self.provider, url)))
    }

    async fn resolve_status(&self, query: StatusQuery<'_>) -> PaymentResult<Resolution> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let (resolution, failure, delay) = self.current();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = failure {
            return Err(self.fail(failure));
        }
        if let StatusQuery::Callback(payload) = query {
            if payload.header(FAKE_SIGNATURE_HEADER) != Some(FAKE_SIGNATURE_OK) {
                return Err(PaymentError::rejected(self.provider.as_str(), "bad signature"));
            }
        }
        Ok(resolution)
    }
}

/// Mailer that records every letter
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    letters: Arc<Mutex<Vec<Letter>>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records, then reports failure
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Letters are recorded only once the delay has elapsed
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn letters(&self) -> Vec<Letter> {
        self.letters.lock().clone()
    }

    pub fn receipts(&self) -> usize {
        self.letters
            .lock()
            .iter()
            .filter(|l| matches!(l, Letter::Receipt { .. }))
            .count()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, letter: &Letter) -> Result<(), NotificationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.letters.lock().push(letter.clone());
        if self.fail {
            return Err(NotificationError::email("smtp unavailable"));
        }
        Ok(())
    }
}

/// Webhook sink that records every event
#[derive(Debug, Clone, Default)]
pub struct RecordingWebhooks {
    events: Arc<Mutex<Vec<PaymentEvent>>>,
    fail: bool,
}

impl RecordingWebhooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<PaymentEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.event).collect()
    }
}

#[async_trait]
impl WebhookSink for RecordingWebhooks {
    async fn deliver(&self, event: &PaymentEvent) -> Result<(), NotificationError> {
        self.events.lock().push(event.clone());
        if self.fail {
            return Err(NotificationError::webhook("HTTP 503"));
        }
        Ok(())
    }
}
