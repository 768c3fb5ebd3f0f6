//! Publish acknowledgement tracking
//!
//! The MQTT client assigns packet ids inside its event loop, so waiters are
//! queued in request order and bound to a packet id when the event loop reports
//! the outgoing publish. Requests are enqueued under the same lock that queues
//! the waiter, which keeps both queues in the same order.

use rumqttc::QoS;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

/// A publish waiting for a packet id; `None` for QoS 0 placeholders
type Waiter = Option<oneshot::Sender<()>>;

#[derive(Debug, Default)]
struct AckState {
    queued: VecDeque<Waiter>,
    inflight: HashMap<u16, oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
pub(crate) struct AckTracker {
    state: Mutex<AckState>,
}

impl AckTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a waiter and submit the request while holding the queue lock
    ///
    /// Returns a receiver that resolves on broker acknowledgement for QoS 1/2,
    /// or `None` for QoS 0.
    pub(crate) async fn register<E>(
        &self,
        qos: QoS,
        submit: impl FnOnce() -> Result<(), E>,
    ) -> Result<Option<oneshot::Receiver<()>>, E> {
        let mut state = self.state.lock().await;

        let (waiter, rx) = match qos {
            QoS::AtMostOnce => (None, None),
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
        };
        state.queued.push_back(waiter);

        if let Err(e) = submit() {
            state.queued.pop_back();
            return Err(e);
        }
        Ok(rx)
    }

    /// The event loop wrote a publish with packet id `pkid`
    pub(crate) async fn on_outgoing_publish(&self, pkid: u16) {
        let mut state = self.state.lock().await;

        // Retransmissions after a reconnect reuse a packet id we already track
        if pkid != 0 && state.inflight.contains_key(&pkid) {
            debug!(pkid, "retransmitted publish");
            return;
        }

        match state.queued.pop_front() {
            Some(Some(tx)) if pkid != 0 => {
                state.inflight.retain(|_, waiter| !waiter.is_closed());
                state.inflight.insert(pkid, tx);
            }
            Some(Some(_)) => debug!("acknowledged publish went out without a packet id"),
            Some(None) => {}
            None => debug!(pkid, "outgoing publish with no registered waiter"),
        }
    }

    /// The broker acknowledged packet id `pkid` (PUBACK or PUBCOMP)
    pub(crate) async fn on_ack(&self, pkid: u16) {
        let mut state = self.state.lock().await;
        if let Some(tx) = state.inflight.remove(&pkid) {
            let _ = tx.send(());
        }
    }

    /// Number of publishes still waiting for a packet id or an acknowledgement
    pub(crate) async fn outstanding(&self) -> usize {
        let state = self.state.lock().await;
        let queued = state
            .queued
            .iter()
            .filter(|w| w.as_ref().is_some_and(|tx| !tx.is_closed()))
            .count();
        let inflight = state.inflight.values().filter(|tx| !tx.is_closed()).count();
        queued + inflight
    }
}
