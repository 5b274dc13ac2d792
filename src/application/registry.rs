use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::publisher::Subscriber;
use crate::domain::{Cadence, ContainerId, RunPhase, ServerMessage, SubscriberId};
use crate::ports::ContainerRuntime;

/// Work outstanding for one container: either a poll in progress or the
/// delay before the next one.
pub(super) enum PollSlot {
    ActivePoll(AbortHandle),
    PendingTimer(AbortHandle),
}

impl PollSlot {
    /// Abort whichever task the slot holds. Does not wait for it to finish.
    fn cancel(self) {
        match self {
            Self::ActivePoll(handle) | Self::PendingTimer(handle) => handle.abort(),
        }
    }

    fn kind(&self) -> SlotKind {
        match self {
            Self::ActivePoll(_) => SlotKind::ActivePoll,
            Self::PendingTimer(_) => SlotKind::PendingTimer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    ActivePoll,
    PendingTimer,
}

/// Per-container polling state
pub(super) struct PollState {
    pub(super) phase: RunPhase,
    pub(super) generation: u64,
    pub(super) cadence: Cadence,
    pub(super) subscribers: HashSet<SubscriberId>,
    pub(super) slot: PollSlot,
}

/// Read-only view of a container's polling state
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PollInfo {
    pub phase: RunPhase,
    pub generation: u64,
    pub cadence: Cadence,
    pub subscribers: usize,
    pub slot: SlotKind,
}

struct SubscriberEntry {
    handle: Subscriber,
    containers: HashSet<ContainerId>,
}

#[derive(Default)]
pub(super) struct RegistryState {
    subscribers: HashMap<SubscriberId, SubscriberEntry>,
    pub(super) polls: HashMap<ContainerId, PollState>,
    next_subscriber: u64,
    next_generation: u64,
}

impl RegistryState {
    /// The poll state for `id`, only if it still belongs to `generation`
    pub(super) fn current_mut(&mut self, id: &ContainerId, generation: u64) -> Option<&mut PollState> {
        self.polls.get_mut(id).filter(|poll| poll.generation == generation)
    }

    /// Deliver `message` to everyone currently subscribed to `id`
    pub(super) fn publish(&self, id: &ContainerId, message: &ServerMessage) -> usize {
        let Some(poll) = self.polls.get(id) else {
            return 0;
        };
        let targets = poll
            .subscribers
            .iter()
            .filter_map(|subscriber| self.subscribers.get(subscriber))
            .map(|entry| &entry.handle);
        super::publisher::publish(targets, message)
    }

    /// Drop `subscriber` from `id`, stopping the stream when nobody is left
    fn release(&mut self, subscriber: SubscriberId, id: &ContainerId) {
        let Some(poll) = self.polls.get_mut(id) else {
            return;
        };
        if !poll.subscribers.remove(&subscriber) || !poll.subscribers.is_empty() {
            return;
        }
        if let Some(poll) = self.polls.remove(id) {
            let kind = poll.slot.kind();
            poll.slot.cancel();
            info!("Stopped stats stream for container: {} ({:?} cancelled)", id, kind);
        }
    }
}

struct Shared {
    runtime: Arc<dyn ContainerRuntime>,
    default_cadence: Cadence,
    state: Mutex<RegistryState>,
}

/// Single source of truth for who watches which container, and for the one
/// polling cycle each watched container has.
///
/// All mutations go through one lock that is never held across an await.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    shared: Arc<Shared>,
}

impl SubscriptionRegistry {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, default_cadence: Cadence) -> Self {
        Self {
            shared: Arc::new(Shared {
                runtime,
                default_cadence,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    pub(super) fn runtime(&self) -> &dyn ContainerRuntime {
        self.shared.runtime.as_ref()
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection; messages for it are pushed into `outbox`
    pub fn connect(&self, outbox: UnboundedSender<ServerMessage>) -> SubscriberId {
        let mut state = self.lock();
        state.next_subscriber += 1;
        let handle = Subscriber::new(SubscriberId::new(state.next_subscriber), outbox);
        let id = handle.id();
        state.subscribers.insert(
            id,
            SubscriberEntry {
                handle,
                containers: HashSet::new(),
            },
        );
        debug!("{} connected", id);
        id
    }

    /// Subscribe to a container. Repeating the call only updates the cadence,
    /// which takes effect when the cycle next re-arms.
    pub fn subscribe(&self, subscriber: SubscriberId, id: ContainerId, cadence_ms: Option<u64>) {
        let cadence = Cadence::requested(cadence_ms, self.shared.default_cadence);
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(entry) = state.subscribers.get_mut(&subscriber) else {
            debug!("Ignoring subscribe from disconnected {}", subscriber);
            return;
        };
        entry.containers.insert(id.clone());

        if let Some(poll) = state.polls.get_mut(&id) {
            poll.subscribers.insert(subscriber);
            if poll.cadence != cadence {
                info!(
                    "Refresh rate for container {} changed to {}ms",
                    id,
                    cadence.as_millis()
                );
                poll.cadence = cadence;
            }
            return;
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        info!(
            "Starting stats stream for container: {} with {}ms refresh rate",
            id,
            cadence.as_millis()
        );
        let slot = self.spawn_poll(id.clone(), generation);
        state.polls.insert(
            id,
            PollState {
                phase: RunPhase::Unknown,
                generation,
                cadence,
                subscribers: HashSet::from([subscriber]),
                slot,
            },
        );
    }

    pub fn unsubscribe(&self, subscriber: SubscriberId, id: &ContainerId) {
        let mut state = self.lock();
        if let Some(entry) = state.subscribers.get_mut(&subscriber) {
            entry.containers.remove(id);
        }
        state.release(subscriber, id);
    }

    /// Revoke every subscription held by a closed connection
    pub fn disconnect(&self, subscriber: SubscriberId) {
        let mut state = self.lock();
        let Some(entry) = state.subscribers.remove(&subscriber) else {
            return;
        };
        for id in &entry.containers {
            state.release(subscriber, id);
        }
        debug!(
            "{} disconnected, released {} subscriptions",
            subscriber,
            entry.containers.len()
        );
    }

    /// Cancel every outstanding poll and forget all subscribers
    pub fn shutdown(&self) {
        let mut state = self.lock();
        let polls = std::mem::take(&mut state.polls);
        for (id, poll) in polls {
            poll.slot.cancel();
            debug!("Cancelled stats stream for container: {}", id);
        }
        state.subscribers.clear();
    }

    /// Number of containers with a live polling cycle
    pub fn active_streams(&self) -> usize {
        self.lock().polls.len()
    }

    #[cfg(test)]
    pub(crate) fn poll_info(&self, id: &ContainerId) -> Option<PollInfo> {
        self.lock().polls.get(id).map(|poll| PollInfo {
            phase: poll.phase.clone(),
            generation: poll.generation,
            cadence: poll.cadence,
            subscribers: poll.subscribers.len(),
            slot: poll.slot.kind(),
        })
    }
}
