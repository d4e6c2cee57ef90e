//! Watch subscriptions: bounded per-subscriber queues fed from the
//! mutation path.
//!
//! Subscribers are registered under the store lock, so an event is
//! either replayed from history at subscription time or delivered live
//! afterwards, never both and never neither. A slow consumer whose
//! queue overflows is cancelled (its stream ends) instead of blocking
//! the mutation path; the client re-lists and resumes.

use std::collections::VecDeque;

use keel_api::{Kind, WatchEvent};
use tokio::sync::mpsc;

/// Per-subscriber queue depth. Overflow cancels the subscriber.
pub(crate) const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

/// Which committed events a subscriber wants to see.
#[derive(Debug, Clone)]
pub(crate) struct WatchFilter {
    pub kind: Kind,
    /// None matches every namespace.
    pub namespace: Option<String>,
}

impl WatchFilter {
    pub fn matches(&self, event: &WatchEvent) -> bool {
        let Some(object) = &event.object else {
            // Bookmarks carry no object and go to everyone.
            return true;
        };
        if object.kind() != self.kind {
            return false;
        }
        match &self.namespace {
            Some(ns) => object.metadata.namespace == *ns,
            None => true,
        }
    }
}

/// A registered subscriber inside the store.
pub(crate) struct Subscriber {
    pub id: u64,
    pub filter: WatchFilter,
    pub tx: mpsc::Sender<WatchEvent>,
}

impl Subscriber {
    /// Offer an event; returns false if the subscriber overflowed and
    /// must be dropped.
    pub fn offer(&self, event: &WatchEvent) -> bool {
        if !self.filter.matches(event) {
            return true;
        }
        self.tx.try_send(event.clone()).is_ok()
    }
}

/// An ordered, gap-free stream of watch events.
///
/// Backlog events (replayed from history at subscription time) are
/// yielded before anything committed after the subscription attached.
/// The stream ends when the store drops the subscriber (queue overflow
/// or store shutdown); a client that still cares re-lists and watches
/// again from the fresh snapshot version.
#[derive(Debug)]
pub struct WatchStream {
    backlog: VecDeque<WatchEvent>,
    rx: mpsc::Receiver<WatchEvent>,
}

impl WatchStream {
    pub(crate) fn new(backlog: VecDeque<WatchEvent>, rx: mpsc::Receiver<WatchEvent>) -> Self {
        Self { backlog, rx }
    }

    /// Receive the next event, or None once the stream is closed.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`].
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        self.rx.try_recv().ok()
    }
}

impl futures_core::Stream for WatchStream {
    type Item = WatchEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        if let Some(event) = self.backlog.pop_front() {
            return std::task::Poll::Ready(Some(event));
        }
        self.rx.poll_recv(cx)
    }
}
