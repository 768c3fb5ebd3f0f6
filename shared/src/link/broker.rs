//! MQTT-backed broker link

use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::acks::AckTracker;
use super::config::LinkConfig;
use super::error::{ConnectError, PublishError, SubscribeError};
use crate::state_machine::{LinkEvent, LinkState, LinkStateMachine, TransitionResult};
use crate::topics;

/// A message delivered on a subscribed topic
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

struct Subscription {
    filter: String,
    qos: QoS,
    tx: mpsc::Sender<InboundMessage>,
}

/// State shared between link handles and the event loop task
struct LinkShared {
    fsm: Mutex<LinkStateMachine>,
    state_tx: watch::Sender<LinkState>,
    subscriptions: RwLock<Vec<Subscription>>,
    acks: AckTracker,
    shutting_down: AtomicBool,
}

impl LinkShared {
    /// Apply an event; returns the new state and the reconnect attempt count
    async fn transition(&self, event: LinkEvent) -> (LinkState, u32) {
        let mut fsm = self.fsm.lock().await;
        match fsm.process_event(event) {
            TransitionResult::Success(state) => {
                self.state_tx.send_replace(state);
            }
            TransitionResult::Invalid { from, event } => {
                debug!(?from, ?event, "ignored link event");
            }
        }
        (fsm.state(), fsm.reconnect_attempts())
    }

    async fn route(&self, topic: String, payload: Bytes, qos: QoS) {
        let targets: Vec<mpsc::Sender<InboundMessage>> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|s| topics::matches(&s.filter, &topic))
                .map(|s| s.tx.clone())
                .collect()
        };

        if targets.is_empty() {
            debug!(%topic, "no subscriber for inbound message");
            return;
        }

        let message = InboundMessage {
            topic,
            payload,
            qos,
        };
        for tx in targets {
            // Bounded send: a slow consumer applies backpressure to the event loop
            if tx.send(message.clone()).await.is_err() {
                debug!(topic = %message.topic, "subscriber dropped its receiver");
            }
        }
    }

    async fn resubscribe_all(&self, client: &AsyncClient) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.retain(|s| !s.tx.is_closed());
        for sub in subscriptions.iter() {
            match client.try_subscribe(sub.filter.clone(), sub.qos) {
                Ok(()) => debug!(filter = %sub.filter, "subscription requested"),
                Err(e) => warn!(filter = %sub.filter, error = %e, "failed to resubscribe"),
            }
        }
    }
}

struct LinkInner {
    client: AsyncClient,
    client_id: String,
    state_rx: watch::Receiver<LinkState>,
    inbound_capacity: usize,
    shared: Arc<LinkShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for LinkInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Handle to a broker session; cheap to clone and safe to share across tasks
#[derive(Clone)]
pub struct BrokerLink {
    inner: Arc<LinkInner>,
}

impl BrokerLink {
    /// Establish a session, waiting at most `config.connect_timeout`
    pub async fn connect(config: LinkConfig) -> Result<Self, ConnectError> {
        let options = config.mqtt_options()?;
        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);

        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let shared = Arc::new(LinkShared {
            fsm: Mutex::new(LinkStateMachine::new()),
            state_tx,
            subscriptions: RwLock::new(Vec::new()),
            acks: AckTracker::new(),
            shutting_down: AtomicBool::new(false),
        });
        shared.transition(LinkEvent::ConnectRequested).await;

        info!(broker = %config.broker_url, client_id = %config.client_id, "connecting to broker");

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(event_loop(
            eventloop,
            client.clone(),
            shared.clone(),
            config.clone(),
            ready_tx,
        ));

        match timeout(config.connect_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                task.abort();
                return Err(e);
            }
            Ok(Err(_)) => {
                task.abort();
                shared.transition(LinkEvent::ConnectFailed).await;
                return Err(ConnectError::Unreachable("event loop stopped".into()));
            }
            Err(_) => {
                task.abort();
                shared.transition(LinkEvent::ConnectFailed).await;
                return Err(ConnectError::Timeout(config.connect_timeout));
            }
        }

        info!(broker = %config.broker_url, "connected to broker");

        Ok(Self {
            inner: Arc::new(LinkInner {
                client,
                client_id: config.client_id,
                state_rx,
                inbound_capacity: config.inbound_capacity,
                shared,
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Keep calling `connect` with exponential backoff until it succeeds
    ///
    /// Configuration errors and broker rejections are returned; everything else
    /// is retried.
    pub async fn connect_with_retry(config: LinkConfig) -> Result<Self, ConnectError> {
        let mut attempt = 0u32;
        loop {
            match Self::connect(config.clone()).await {
                Ok(link) => return Ok(link),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    let delay = config.backoff_delay(attempt);
                    warn!(error = %e, attempt, ?delay, "broker connect failed, retrying");
                    sleep(delay).await;
                }
            }
        }
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.inner.state_rx.borrow()
    }

    /// Watch link state changes
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Publish `payload` to `topic`
    ///
    /// For QoS 1 and 2 this waits for the broker acknowledgement; the whole call
    /// never takes longer than `wait`. QoS 0 returns once the request is queued.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        wait: Duration,
    ) -> Result<(), PublishError> {
        if !topics::is_valid_publish_topic(topic) {
            return Err(PublishError::BrokerRejected(format!(
                "invalid topic name {topic:?}"
            )));
        }
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        let deadline = Instant::now() + wait;
        let client = &self.inner.client;
        let registered = timeout_at(
            deadline,
            self.inner.shared.acks.register(qos, || {
                client.try_publish(topic, qos, false, payload.to_vec())
            }),
        )
        .await;

        let waiter = match registered {
            Ok(Ok(waiter)) => waiter,
            Ok(Err(e)) => {
                debug!(%topic, error = %e, "publish request not accepted by client");
                return Err(PublishError::NotConnected);
            }
            Err(_) => return Err(PublishError::Timeout(wait)),
        };

        let Some(waiter) = waiter else {
            return Ok(());
        };

        match timeout_at(deadline, waiter).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(PublishError::NotConnected),
            Err(_) => Err(PublishError::Timeout(wait)),
        }
    }

    /// Register a subscription and return the channel its messages arrive on
    ///
    /// Subscriptions are replayed automatically after every reconnect.
    pub async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
    ) -> Result<mpsc::Receiver<InboundMessage>, SubscribeError> {
        if filter.is_empty() {
            return Err(SubscribeError::InvalidFilter(filter.to_string()));
        }

        let (tx, rx) = mpsc::channel(self.inner.inbound_capacity);
        self.inner.shared.subscriptions.write().await.push(Subscription {
            filter: filter.to_string(),
            qos,
            tx,
        });

        // Otherwise the next connack replays it
        if self.is_connected() {
            self.inner
                .client
                .subscribe(filter, qos)
                .await
                .map_err(|_| SubscribeError::LinkClosed)?;
        }

        info!(%filter, ?qos, "subscribed");
        Ok(rx)
    }

    /// Flush in-flight acknowledgements for up to `grace`, then close the session
    pub async fn disconnect(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        let shared = &self.inner.shared;
        shared.shutting_down.store(true, Ordering::SeqCst);

        while shared.acks.outstanding().await > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }

        if let Err(e) = self.inner.client.try_disconnect() {
            debug!(error = %e, "disconnect request not delivered");
        }

        let task = self.inner.task.lock().await.take();
        if let Some(mut task) = task {
            if timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
            }
        }

        shared.transition(LinkEvent::DisconnectRequested).await;
        info!(client_id = %self.inner.client_id, "disconnected from broker");
    }
}

fn classify(error: ConnectionError) -> ConnectError {
    match error {
        ConnectionError::ConnectionRefused(code) => ConnectError::Rejected(format!("{code:?}")),
        ConnectionError::NetworkTimeout => ConnectError::Unreachable("network timeout".into()),
        other => ConnectError::Unreachable(other.to_string()),
    }
}

/// Drive the MQTT event loop until shutdown
async fn event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    shared: Arc<LinkShared>,
    config: LinkConfig,
    ready_tx: oneshot::Sender<Result<(), ConnectError>>,
) {
    let mut ready = Some(ready_tx);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let (_, attempts) = shared.transition(LinkEvent::ConnAckReceived).await;
                debug!(session_present = ack.session_present, "connack received");
                if ready.is_none() {
                    info!(after_attempts = attempts, "broker link restored");
                }
                shared.resubscribe_all(&client).await;
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                shared
                    .route(publish.topic, publish.payload, publish.qos)
                    .await;
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                shared.acks.on_ack(ack.pkid).await;
            }
            Ok(Event::Incoming(Packet::PubComp(comp))) => {
                shared.acks.on_ack(comp.pkid).await;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(pkid = ack.pkid, "suback received");
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                shared.acks.on_outgoing_publish(pkid).await;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                if shared.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                if shared.shutting_down.load(Ordering::SeqCst) {
                    break;
                }

                if let Some(tx) = ready.take() {
                    warn!(error = %e, "broker connect failed");
                    shared.transition(LinkEvent::ConnectFailed).await;
                    let _ = tx.send(Err(classify(e)));
                    return;
                }

                let (_, attempts) = shared.transition(LinkEvent::LinkLost).await;
                let delay = config.backoff_delay(attempts);
                warn!(error = %e, attempt = attempts, ?delay, "broker link lost, reconnecting");
                sleep(delay).await;
            }
        }
    }

    debug!("broker event loop stopped");
}
