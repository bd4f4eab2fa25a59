//! Turns a webhook body into a Chatbase batch and delivers it, either inline
//! or through a bounded background queue.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::chatbase::{AnalyticsSink, MessageSet, MessageType};
use crate::error::ForwardError;
use crate::platforms::alice::AliceRequest;
use crate::platforms::telegram::TelegramHandler;
use crate::platforms::{is_alice, WebhookHandler, ALICE_SOURCE, TELEGRAM_SOURCE};

/// Version string reported with every analytics message.
pub const BOT_VERSION: &str = "0.1";

/// Dialogflow action of the default fallback intent.
pub const FALLBACK_ACTION: &str = "input.unknown";

/// Build the user/agent message pair for one webhook request.
pub fn build_events(raw: &Value, api_key: &str) -> Result<MessageSet, ForwardError> {
    let mut msg = WebhookHandler::new(raw.clone());

    let (user_msg, user_id) = if is_alice(&msg) {
        msg.set_source(ALICE_SOURCE);
        let alice = AliceRequest::new(msg.payload());
        (alice.command()?.to_string(), alice.uid()?)
    } else if msg.source() == TELEGRAM_SOURCE {
        let tg = TelegramHandler::new(msg.payload())?;
        (tg.text().unwrap_or("").to_string(), tg.uid()?)
    } else {
        (String::new(), String::new())
    };

    let intent = msg.intent_display_name()?;
    let session_id = msg.session_id()?;
    let not_handled = msg.action() == FALLBACK_ACTION;

    let mut set = MessageSet::new(api_key, msg.source(), BOT_VERSION, user_id);
    set.new_message(intent, &user_msg, session_id, MessageType::User, not_handled);
    set.new_message(
        intent,
        msg.fulfillment_text(),
        session_id,
        MessageType::Agent,
        false,
    );
    Ok(set)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Hand the batch to a background worker and return immediately.
    Queue,
    /// Await delivery inside the request handler.
    Inline,
    Off,
}

impl ForwardMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardMode::Queue => "queue",
            ForwardMode::Inline => "inline",
            ForwardMode::Off => "off",
        }
    }
}

impl FromStr for ForwardMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(ForwardMode::Queue),
            "inline" => Ok(ForwardMode::Inline),
            "off" | "none" | "disabled" => Ok(ForwardMode::Off),
            other => Err(format!("unknown forward mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Delivery counters exposed on `/metrics`.
#[derive(Debug, Default)]
pub struct ForwardStats {
    pub forwarded: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
    pub retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Forwarded,
    Queued,
    Dropped,
    Failed,
    Disabled,
}

impl ForwardOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardOutcome::Forwarded => "forwarded",
            ForwardOutcome::Queued => "queued",
            ForwardOutcome::Dropped => "dropped",
            ForwardOutcome::Failed => "failed",
            ForwardOutcome::Disabled => "disabled",
        }
    }
}

fn is_retryable(err: &ForwardError) -> bool {
    match err {
        ForwardError::Http(_) => true,
        ForwardError::Status { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

/// Send `set`, retrying transport errors and 5xx/429 responses.
pub async fn deliver_with_retry(
    sink: &dyn AnalyticsSink,
    set: &MessageSet,
    policy: RetryPolicy,
    stats: &ForwardStats,
) -> Result<(), ForwardError> {
    let mut attempt: u32 = 0;
    loop {
        match sink.send_batch(set).await {
            Ok(()) => {
                stats.forwarded.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(err) if attempt < policy.retries && is_retryable(&err) => {
                let delay = policy.backoff.saturating_mul(1u32 << attempt.min(16));
                tracing::debug!(sink = sink.name(), attempt, error = %err, ?delay, "retrying analytics delivery");
                stats.retries.fetch_add(1, Ordering::Relaxed);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        }
    }
}

/// Bounded queue drained by a single background worker.
#[derive(Clone, Debug)]
pub struct ForwardQueue {
    tx: mpsc::Sender<MessageSet>,
    depth: Arc<AtomicUsize>,
}

impl ForwardQueue {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(
        sink: Arc<dyn AnalyticsSink>,
        capacity: usize,
        policy: RetryPolicy,
        stats: Arc<ForwardStats>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<MessageSet>(capacity.max(1));
        let depth = Arc::new(AtomicUsize::new(0));
        let worker_depth = depth.clone();
        tokio::spawn(async move {
            while let Some(set) = rx.recv().await {
                worker_depth.fetch_sub(1, Ordering::Relaxed);
                if let Err(err) = deliver_with_retry(sink.as_ref(), &set, policy, &stats).await {
                    tracing::warn!(sink = sink.name(), platform = %set.platform, error = %err, "analytics delivery failed");
                }
            }
            tracing::debug!("forward queue closed");
        });
        Self { tx, depth }
    }

    pub fn enqueue(&self, set: MessageSet) -> Result<(), ForwardError> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(set) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => ForwardError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => ForwardError::QueueClosed,
                })
            }
        }
    }

    /// Batches waiting for the worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Dispatches batches according to the configured [`ForwardMode`].
#[derive(Clone)]
pub struct Forwarder {
    mode: ForwardMode,
    sink: Option<Arc<dyn AnalyticsSink>>,
    queue: Option<ForwardQueue>,
    policy: RetryPolicy,
    stats: Arc<ForwardStats>,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("mode", &self.mode)
            .field("sink", &self.sink.as_ref().map(|s| s.name().to_string()))
            .field("queue_depth", &self.queue_depth())
            .finish()
    }
}

impl Forwarder {
    /// A missing sink forces `Off`.  `Queue` spawns the worker, so it must be
    /// called inside a tokio runtime.
    pub fn new(
        mode: ForwardMode,
        sink: Option<Arc<dyn AnalyticsSink>>,
        capacity: usize,
        policy: RetryPolicy,
    ) -> Self {
        let stats = Arc::new(ForwardStats::default());
        let mode = if sink.is_none() { ForwardMode::Off } else { mode };
        let queue = match (&mode, &sink) {
            (ForwardMode::Queue, Some(s)) => {
                Some(ForwardQueue::spawn(s.clone(), capacity, policy, stats.clone()))
            }
            _ => None,
        };
        Self {
            mode,
            sink,
            queue,
            policy,
            stats,
        }
    }

    pub fn disabled() -> Self {
        Self::new(ForwardMode::Off, None, 1, RetryPolicy::default())
    }

    pub fn mode(&self) -> ForwardMode {
        self.mode
    }

    pub fn stats(&self) -> &ForwardStats {
        &self.stats
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.as_ref().map(ForwardQueue::depth).unwrap_or(0)
    }

    /// Deliver or enqueue `set`.  Never fails: problems are logged and counted.
    pub async fn dispatch(&self, set: MessageSet) -> ForwardOutcome {
        match (self.mode, &self.sink, &self.queue) {
            (ForwardMode::Inline, Some(sink), _) => {
                match deliver_with_retry(sink.as_ref(), &set, self.policy, &self.stats).await {
                    Ok(()) => ForwardOutcome::Forwarded,
                    Err(err) => {
                        tracing::warn!(sink = sink.name(), platform = %set.platform, error = %err, "analytics delivery failed");
                        ForwardOutcome::Failed
                    }
                }
            }
            (ForwardMode::Queue, _, Some(queue)) => match queue.enqueue(set) {
                Ok(()) => ForwardOutcome::Queued,
                Err(err) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %err, "analytics batch dropped");
                    ForwardOutcome::Dropped
                }
            },
            _ => ForwardOutcome::Disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<MessageSet>>,
        fail_first: AtomicUsize,
        status: u16,
    }

    #[async_trait::async_trait]
    impl AnalyticsSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_batch(&self, set: &MessageSet) -> Result<(), ForwardError> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(ForwardError::Status {
                    status: self.status,
                    body: "unavailable".into(),
                });
            }
            self.sent.lock().unwrap().push(set.clone());
            Ok(())
        }
    }

    fn telegram_body(action: &str) -> Value {
        json!({
            "responseId": "r-1",
            "session": "projects/oil/agent/sessions/tg-1",
            "queryResult": {
                "queryText": "инциденты",
                "action": action,
                "fulfillmentText": "Инцидентов нет",
                "intent": {"name": "projects/oil/agent/intents/2", "displayName": "incidents"}
            },
            "originalDetectIntentRequest": {
                "source": "telegram",
                "payload": {"data": {
                    "message_id": 3,
                    "from": {"id": 901, "language_code": "ru"},
                    "chat": {"id": 901, "type": "private"},
                    "text": "инциденты"
                }}
            }
        })
    }

    fn alice_body() -> Value {
        json!({
            "session": "projects/oil/agent/sessions/al-1",
            "queryResult": {
                "fulfillmentText": "Добыча 120 т",
                "intent": {"displayName": "mining"}
            },
            "originalDetectIntentRequest": {
                "payload": {
                    "meta": {"client_id": "ru.yandex.searchplugin/7.16"},
                    "session": {"application": {"application_id": "47C73714B580ED24"}},
                    "request": {"command": "добыча"}
                }
            }
        })
    }

    #[test]
    fn telegram_request_builds_user_and_agent_messages() {
        let set = build_events(&telegram_body("incidents.list"), "key").unwrap();
        assert_eq!(set.platform, "telegram");
        assert_eq!(set.user_id, "901-ru.telegram_client");
        assert_eq!(set.len(), 2);
        let user = &set.messages[0];
        assert_eq!(user.msg_type, MessageType::User);
        assert_eq!(user.message, "инциденты");
        assert_eq!(user.intent, "incidents");
        assert_eq!(user.session_id, "projects/oil/agent/sessions/tg-1");
        assert_eq!(user.version, BOT_VERSION);
        assert!(!user.not_handled);
        let agent = &set.messages[1];
        assert_eq!(agent.msg_type, MessageType::Agent);
        assert_eq!(agent.message, "Инцидентов нет");
    }

    #[test]
    fn fallback_action_marks_user_message_not_handled() {
        let set = build_events(&telegram_body(FALLBACK_ACTION), "key").unwrap();
        assert!(set.messages[0].not_handled);
        assert!(!set.messages[1].not_handled);
    }

    #[test]
    fn alice_request_is_relabelled() {
        let set = build_events(&alice_body(), "key").unwrap();
        assert_eq!(set.platform, "alice");
        assert_eq!(set.user_id, "47C73714B-ru.yandex.searchplugin/7.16");
        assert_eq!(set.messages[0].message, "добыча");
    }

    #[test]
    fn unknown_platform_sends_empty_user_text() {
        let body = json!({
            "session": "s",
            "queryResult": {"intent": {"displayName": "hello"}, "fulfillmentText": "hi"},
            "originalDetectIntentRequest": {"source": "google"}
        });
        let set = build_events(&body, "key").unwrap();
        assert_eq!(set.platform, "google");
        assert_eq!(set.user_id, "");
        assert_eq!(set.messages[0].message, "");
    }

    #[test]
    fn telegram_sender_without_language_is_an_adapter_error() {
        let mut body = telegram_body("wells.list");
        body["originalDetectIntentRequest"]["payload"]["data"]["from"]
            .as_object_mut()
            .unwrap()
            .remove("language_code");
        assert!(matches!(
            build_events(&body, "key"),
            Err(ForwardError::Adapter(AdapterError::Malformed("from.language_code")))
        ));
    }

    #[test]
    fn missing_intent_is_an_adapter_error() {
        let body = json!({"session": "s", "queryResult": {}});
        assert!(matches!(
            build_events(&body, "key"),
            Err(ForwardError::Adapter(_))
        ));
    }

    #[test]
    fn forward_mode_parses_aliases() {
        assert_eq!("Queue".parse::<ForwardMode>().unwrap(), ForwardMode::Queue);
        assert_eq!("disabled".parse::<ForwardMode>().unwrap(), ForwardMode::Off);
        assert!("sometimes".parse::<ForwardMode>().is_err());
    }

    #[tokio::test]
    async fn inline_retries_server_errors() {
        let sink = Arc::new(RecordingSink {
            fail_first: AtomicUsize::new(2),
            status: 503,
            ..Default::default()
        });
        let policy = RetryPolicy {
            retries: 2,
            backoff: Duration::from_millis(1),
        };
        let fwd = Forwarder::new(ForwardMode::Inline, Some(sink.clone() as Arc<dyn AnalyticsSink>), 4, policy);
        let set = build_events(&telegram_body("x"), "key").unwrap();
        assert_eq!(fwd.dispatch(set).await, ForwardOutcome::Forwarded);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert_eq!(fwd.stats().retries.load(Ordering::Relaxed), 2);
        assert_eq!(fwd.stats().forwarded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let sink = Arc::new(RecordingSink {
            fail_first: AtomicUsize::new(1),
            status: 400,
            ..Default::default()
        });
        let fwd = Forwarder::new(
            ForwardMode::Inline,
            Some(sink.clone() as Arc<dyn AnalyticsSink>),
            4,
            RetryPolicy::default(),
        );
        let set = build_events(&telegram_body("x"), "key").unwrap();
        assert_eq!(fwd.dispatch(set).await, ForwardOutcome::Failed);
        assert_eq!(fwd.stats().failed.load(Ordering::Relaxed), 1);
        assert_eq!(fwd.stats().retries.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn queue_delivers_in_background() {
        let sink = Arc::new(RecordingSink::default());
        let fwd = Forwarder::new(
            ForwardMode::Queue,
            Some(sink.clone() as Arc<dyn AnalyticsSink>),
            8,
            RetryPolicy::default(),
        );
        let set = build_events(&alice_body(), "key").unwrap();
        assert_eq!(fwd.dispatch(set).await, ForwardOutcome::Queued);
        for _ in 0..100 {
            if !sink.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert_eq!(fwd.queue_depth(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (tx, _rx) = mpsc::channel::<MessageSet>(1);
        let queue = ForwardQueue {
            tx,
            depth: Arc::new(AtomicUsize::new(0)),
        };
        let set = build_events(&alice_body(), "key").unwrap();
        queue.enqueue(set.clone()).unwrap();
        assert!(matches!(queue.enqueue(set), Err(ForwardError::QueueFull)));
        assert_eq!(queue.depth(), 1);
    }

    struct BlockedSink {
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl AnalyticsSink for BlockedSink {
        fn name(&self) -> &str {
            "blocked"
        }

        async fn send_batch(&self, _set: &MessageSet) -> Result<(), ForwardError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_drops_when_queue_is_full() {
        let sink = Arc::new(BlockedSink {
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let fwd = Forwarder::new(
            ForwardMode::Queue,
            Some(sink.clone() as Arc<dyn AnalyticsSink>),
            1,
            RetryPolicy::default(),
        );
        let set = build_events(&alice_body(), "key").unwrap();

        // worker holds the first batch inside the sink
        assert_eq!(fwd.dispatch(set.clone()).await, ForwardOutcome::Queued);
        sink.started.notified().await;
        // second fills the single slot
        assert_eq!(fwd.dispatch(set.clone()).await, ForwardOutcome::Queued);
        assert_eq!(fwd.queue_depth(), 1);

        assert_eq!(fwd.dispatch(set).await, ForwardOutcome::Dropped);
        assert_eq!(fwd.stats().dropped.load(Ordering::Relaxed), 1);
        assert_eq!(fwd.queue_depth(), 1);

        sink.release.notify_one();
    }

    #[tokio::test]
    async fn missing_sink_disables_forwarding() {
        let fwd = Forwarder::new(ForwardMode::Queue, None, 8, RetryPolicy::default());
        assert_eq!(fwd.mode(), ForwardMode::Off);
        let set = build_events(&alice_body(), "key").unwrap();
        assert_eq!(fwd.dispatch(set).await, ForwardOutcome::Disabled);
    }
}
