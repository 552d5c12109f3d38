use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use spex_core::Status;

use super::api::CommutatorApi;
use super::commutator::{Commutator, SlotEvent};

/// Stream of slot events from a monitor subscription.
///
/// Not restartable: once it ends, subscribe again through
/// [`Commutator::monitor`]. Dropping the monitor closes its session.
pub struct SlotMonitor {
    commutator: Arc<Commutator>,
    api: CommutatorApi,
    pending: VecDeque<SlotEvent>,
    ended: Option<Status>,
}

impl SlotMonitor {
    pub(crate) fn new(commutator: Arc<Commutator>, api: CommutatorApi) -> Self {
        Self {
            commutator,
            api,
            pending: VecDeque::new(),
            ended: None,
        }
    }

    /// Next event, or `None` once the subscription is over.
    pub async fn next_event(&mut self) -> Option<SlotEvent> {
        let idle = self.commutator.settings().response_timeout;
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.ended.is_some() {
                return None;
            }
            match self.api.next_update(idle).await {
                Ok(update) => self.pending.extend(self.commutator.apply_update(update)),
                Err(Status::ResponseTimeout) => {}
                Err(status) => {
                    tracing::info!(commutator = %self.commutator.name(), %status, "monitor ended");
                    self.ended = Some(status);
                }
            }
        }
    }

    /// The same events as a `Stream`.
    pub fn into_stream(self) -> impl Stream<Item = SlotEvent> {
        stream::unfold(self, |mut monitor| async move {
            let event = monitor.next_event().await?;
            Some((event, monitor))
        })
    }

    pub fn end_reason(&self) -> Option<Status> {
        self.ended
    }

    pub fn close(&mut self) {
        self.api.session().close();
        self.pending.clear();
        self.ended.get_or_insert(Status::Canceled);
    }
}

impl Drop for SlotMonitor {
    fn drop(&mut self) {
        self.api.session().close();
    }
}
