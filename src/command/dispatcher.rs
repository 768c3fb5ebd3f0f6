//! Command dispatcher - decodes inbound commands and runs their handlers

use super::registry::{ActionRegistry, HandlerContext};
use super::report::OutcomeSink;
use bytes::Bytes;
use cmdrelay_shared::{codec, topics, CommandEnvelope, DecodeError, DispatchOutcome, InboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Default depth of each per-topic work queue
pub const DEFAULT_WORKER_CAPACITY: usize = 32;

/// Why a command did not complete successfully
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("unknown action")]
    UnknownAction,

    #[error("{0:#}")]
    Handler(anyhow::Error),

    #[error("handler panicked")]
    Panicked,

    #[error("handler was cancelled")]
    Cancelled,

    /// The device's work queue is full
    #[error("device busy")]
    Busy,
}

/// Turns inbound command payloads into executed actions and outcomes
pub struct CommandDispatcher {
    registry: Arc<ActionRegistry>,
    sink: Option<Arc<dyn OutcomeSink>>,
    worker_capacity: usize,
}

impl CommandDispatcher {
    /// Create a dispatcher that owns `registry` for its lifetime
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            sink: None,
            worker_capacity: DEFAULT_WORKER_CAPACITY,
        }
    }

    /// Report every outcome to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_worker_capacity(mut self, capacity: usize) -> Self {
        self.worker_capacity = capacity.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Decode and execute one payload, always producing an outcome
    pub async fn dispatch(&self, device_id: &str, payload: &[u8]) -> DispatchOutcome {
        let start = Instant::now();

        let outcome = match codec::decode(payload) {
            Ok(envelope) => {
                let action = envelope.action().to_string();
                match self.execute(device_id, envelope).await {
                    Ok(detail) => DispatchOutcome::ok(action, detail),
                    Err(e) => DispatchOutcome::error(action, e.to_string()),
                }
            }
            Err(e) => {
                warn!(
                    %device_id,
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "bad command payload"
                );
                DispatchOutcome::error("", DispatchError::from(e).to_string())
            }
        };
        let outcome = outcome.with_elapsed(start.elapsed().as_millis() as u64);

        if outcome.is_ok() {
            info!(
                %device_id,
                action = %outcome.action,
                detail = %outcome.detail,
                "command completed"
            );
        } else {
            warn!(
                %device_id,
                action = %outcome.action,
                detail = %outcome.detail,
                "command failed"
            );
        }
        outcome
    }

    /// Execute a decoded envelope on its own task
    ///
    /// Handler errors and panics are returned as `DispatchError`s.
    pub async fn execute(
        &self,
        device_id: &str,
        envelope: CommandEnvelope,
    ) -> Result<String, DispatchError> {
        let (action, params) = envelope.into_parts();

        let handler = self
            .registry
            .lookup(&action)
            .await
            .ok_or(DispatchError::UnknownAction)?;

        debug!(%device_id, %action, ?params, "executing command");

        let ctx = HandlerContext {
            device_id: device_id.to_string(),
            action,
        };
        let task = tokio::spawn(async move { handler.execute(&ctx, params).await });

        match task.await {
            Ok(Ok(detail)) => Ok(detail),
            Ok(Err(e)) => Err(DispatchError::Handler(e)),
            Err(e) if e.is_panic() => Err(DispatchError::Panicked),
            Err(_) => Err(DispatchError::Cancelled),
        }
    }

    /// Consume inbound messages until the channel closes
    ///
    /// Each topic gets its own sequential worker, so commands for one device run
    /// in arrival order while other devices proceed independently. Hand-off never
    /// waits: a command for a device whose queue is full is rejected as busy.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>) {
        let mut workers: HashMap<String, mpsc::Sender<Bytes>> = HashMap::new();
        let mut tasks = JoinSet::new();

        while let Some(message) = inbound.recv().await {
            let device_id = topics::device_id_from_topic(&message.topic)
                .unwrap_or(&message.topic)
                .to_string();
            let tx = workers.entry(message.topic.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.worker_capacity);
                tasks.spawn(self.clone().run_worker(device_id.clone(), rx));
                tx
            });

            match tx.try_send(message.payload) {
                Ok(()) => {}
                Err(TrySendError::Full(payload)) => self.reject_busy(device_id, payload),
                Err(TrySendError::Closed(_)) => {
                    warn!(topic = %message.topic, "dispatch worker stopped, dropping command");
                    workers.remove(&message.topic);
                }
            }
        }

        drop(workers);
        while tasks.join_next().await.is_some() {}
        debug!("command dispatcher stopped");
    }

    /// Report a command that could not be queued, off the receive loop
    fn reject_busy(&self, device_id: String, payload: Bytes) {
        let action = codec::decode(&payload)
            .map(|envelope| envelope.action().to_string())
            .unwrap_or_default();
        warn!(
            %device_id,
            %action,
            capacity = self.worker_capacity,
            "device busy, command rejected"
        );

        let outcome = DispatchOutcome::error(action, DispatchError::Busy.to_string());
        if let Some(sink) = self.sink.clone() {
            tokio::spawn(async move { sink.report(&device_id, &outcome).await });
        }
    }

    async fn run_worker(self: Arc<Self>, device_id: String, mut rx: mpsc::Receiver<Bytes>) {
        while let Some(payload) = rx.recv().await {
            let outcome = self.dispatch(&device_id, &payload).await;
            if let Some(sink) = &self.sink {
                sink.report(&device_id, &outcome).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use cmdrelay_shared::{OutcomeStatus, Params, QoS};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Collector {
        outcomes: Mutex<Vec<(String, DispatchOutcome)>>,
    }

    #[async_trait]
    impl OutcomeSink for Collector {
        async fn report(&self, device_id: &str, outcome: &DispatchOutcome) {
            self.outcomes
                .lock()
                .await
                .push((device_id.to_string(), outcome.clone()));
        }
    }

    impl Collector {
        async fn wait_for(&self, count: usize) -> Vec<(String, DispatchOutcome)> {
            for _ in 0..200 {
                let outcomes = self.outcomes.lock().await;
                if outcomes.len() >= count {
                    return outcomes.clone();
                }
                drop(outcomes);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("timed out waiting for {count} outcomes");
        }
    }

    fn message(topic: &str, payload: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from(payload.to_string()),
            qos: QoS::AtLeastOnce,
        }
    }

    async fn registry_with_counter(calls: Arc<AtomicUsize>) -> Arc<ActionRegistry> {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_fn("count", move |_, _| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    anyhow::Ok(format!("call {n}"))
                }
            })
            .await
            .unwrap();
        registry
            .register_fn("fail", |_, _| async { Err::<String, _>(anyhow::anyhow!("motor jammed")) })
            .await
            .unwrap();
        registry
            .register_fn("explode", |_, _| async {
                if true {
                    panic!("handler bug");
                }
                anyhow::Ok(String::new())
            })
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_unknown_action_invokes_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = CommandDispatcher::new(registry_with_counter(calls.clone()).await);

        let outcome = dispatcher
            .dispatch("device123", br#"{"action":"launch","params":{"count":1}}"#)
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.detail, "unknown action");
        assert_eq!(outcome.action, "launch");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_known_action_runs_with_params() {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_fn("sum", |ctx: HandlerContext, params: Params| async move {
                let total: i64 = params.values().filter_map(|v| v.as_i64()).sum();
                anyhow::Ok(format!("{} {} {}", ctx.device_id, ctx.action, total))
            })
            .await
            .unwrap();
        let dispatcher = CommandDispatcher::new(registry);

        let outcome = dispatcher
            .dispatch("dev-9", br#"{"action":"sum","params":{"a":2,"b":40}}"#)
            .await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.detail, "dev-9 sum 42");
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported_not_fatal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = CommandDispatcher::new(registry_with_counter(calls.clone()).await);

        let outcome = dispatcher.dispatch("device123", br#"{"params":{}}"#).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.action, "");
        assert!(outcome.detail.contains("action"), "{}", outcome.detail);

        let outcome = dispatcher.dispatch("device123", br#"{"action":"count"}"#).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = CommandDispatcher::new(registry_with_counter(calls.clone()).await);

        let outcome = dispatcher.dispatch("device123", br#"{"action":"fail"}"#).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.detail, "motor jammed");

        let outcome = dispatcher.dispatch("device123", br#"{"action":"explode"}"#).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.detail, "handler panicked");

        let outcome = dispatcher.dispatch("device123", br#"{"action":"count"}"#).await;
        assert!(outcome.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_preserves_order_per_topic() {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_fn("step", |_, params: Params| async move {
                // Earlier steps sleep longer; order must still hold
                let n = params.get("n").and_then(|v| v.as_u64()).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(30 - n * 10)).await;
                anyhow::Ok(n.to_string())
            })
            .await
            .unwrap();

        let collector = Arc::new(Collector::default());
        let dispatcher = Arc::new(CommandDispatcher::new(registry).with_sink(collector.clone()));

        let (tx, rx) = mpsc::channel(8);
        let run = tokio::spawn(dispatcher.run(rx));

        for n in 0..3 {
            tx.send(message(
                "devices/a/commands",
                &format!(r#"{{"action":"step","params":{{"n":{n}}}}}"#),
            ))
            .await
            .unwrap();
        }

        let outcomes = collector.wait_for(3).await;
        let details: Vec<&str> = outcomes.iter().map(|(_, o)| o.detail.as_str()).collect();
        assert_eq!(details, vec!["0", "1", "2"]);
        assert!(outcomes.iter().all(|(id, _)| id == "a"));

        drop(tx);
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_device_does_not_stall_others() {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_fn("slow", |_, _| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                anyhow::Ok("slow done".to_string())
            })
            .await
            .unwrap();
        registry
            .register_fn("fast", |_, _| async { anyhow::Ok("fast done".to_string()) })
            .await
            .unwrap();

        let collector = Arc::new(Collector::default());
        let dispatcher = Arc::new(CommandDispatcher::new(registry).with_sink(collector.clone()));

        let (tx, rx) = mpsc::channel(8);
        let run = tokio::spawn(dispatcher.run(rx));

        tx.send(message("devices/a/commands", r#"{"action":"slow"}"#))
            .await
            .unwrap();
        tx.send(message("devices/b/commands", r#"{"action":"fast"}"#))
            .await
            .unwrap();

        let first = collector.wait_for(1).await;
        assert_eq!(first[0].0, "b");
        assert_eq!(first[0].1.detail, "fast done");

        let both = collector.wait_for(2).await;
        assert_eq!(both[1].0, "a");

        drop(tx);
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_device_queue_does_not_block_other_devices() {
        // Holds every "stuck" handler until the gate closes
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let registry = Arc::new(ActionRegistry::new());
        let held = gate.clone();
        registry
            .register_fn("stuck", move |_, _| {
                let held = held.clone();
                async move {
                    let _ = held.acquire().await;
                    anyhow::Ok("released".to_string())
                }
            })
            .await
            .unwrap();
        registry
            .register_fn("fast", |_, _| async { anyhow::Ok("fast done".to_string()) })
            .await
            .unwrap();

        let collector = Arc::new(Collector::default());
        let dispatcher = Arc::new(
            CommandDispatcher::new(registry)
                .with_sink(collector.clone())
                .with_worker_capacity(2),
        );

        let (tx, rx) = mpsc::channel(64);
        let run = tokio::spawn(dispatcher.run(rx));

        for _ in 0..10 {
            tx.send(message("devices/a/commands", r#"{"action":"stuck"}"#))
                .await
                .unwrap();
        }
        let sent = std::time::Instant::now();
        tx.send(message("devices/b/commands", r#"{"action":"fast"}"#))
            .await
            .unwrap();

        let mut fast_done = false;
        for _ in 0..50 {
            let outcomes = collector.outcomes.lock().await;
            if outcomes.iter().any(|(id, o)| id == "b" && o.detail == "fast done") {
                fast_done = true;
                break;
            }
            drop(outcomes);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(fast_done, "device b stalled behind device a");
        assert!(sent.elapsed() < Duration::from_millis(500));

        // At most one running and two queued; the rest are rejected
        let outcomes = collector.wait_for(8).await;
        let busy: Vec<_> = outcomes
            .iter()
            .filter(|(id, o)| id == "a" && o.detail == "device busy")
            .collect();
        assert!(busy.len() >= 7, "{} busy outcomes", busy.len());
        assert!(busy.iter().all(|(_, o)| o.action == "stuck" && !o.is_ok()));

        gate.close();
        drop(tx);
        run.await.unwrap();
    }
}
