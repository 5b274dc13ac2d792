//! The poll -> parse -> publish -> re-arm cycle run for every watched container.
//!
//! Each cycle alternates between two kinds of task, and the registry slot for
//! the container always holds the one currently outstanding. Every task
//! carries the generation it was started for and stops silently once the
//! registry has moved on.

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::registry::{PollSlot, SubscriptionRegistry};
use crate::domain::{Cadence, ContainerId, RunPhase, ServerMessage};

impl SubscriptionRegistry {
    /// Spawn one poll step; the returned slot must be stored by the caller
    /// while it still holds the registry lock.
    pub(super) fn spawn_poll(&self, id: ContainerId, generation: u64) -> PollSlot {
        let registry = self.clone();
        let task = tokio::spawn(async move { registry.poll_step(id, generation).await });
        PollSlot::ActivePoll(task.abort_handle())
    }

    fn spawn_timer(&self, id: ContainerId, generation: u64, cadence: Cadence) -> PollSlot {
        let registry = self.clone();
        let task = tokio::spawn(async move {
            sleep(cadence.as_duration()).await;
            registry.timer_fired(id, generation);
        });
        PollSlot::PendingTimer(task.abort_handle())
    }

    fn timer_fired(&self, id: ContainerId, generation: u64) {
        let mut state = self.lock();
        let Some(poll) = state.current_mut(&id, generation) else {
            return;
        };
        poll.slot = self.spawn_poll(id, generation);
    }

    async fn poll_step(self, id: ContainerId, generation: u64) {
        let phase = match self.runtime().inspect(&id).await {
            Ok(phase) => phase,
            Err(e) => {
                warn!("Failed to inspect container {}: {}", id, e);
                RunPhase::Unknown
            }
        };

        if !self.record_phase(&id, generation, &phase) {
            return;
        }

        let message = if phase.is_running() {
            match self.runtime().snapshot(&id).await {
                Ok(record) => Some(ServerMessage::stats(id.clone(), record)),
                Err(e) => {
                    warn!("Docker stats error for {}: {}", id, e);
                    None
                }
            }
        } else {
            Some(ServerMessage::status(id.clone(), &phase))
        };

        self.complete_step(id, generation, message);
    }

    /// Store the observed phase. False when this cycle has been superseded.
    fn record_phase(&self, id: &ContainerId, generation: u64, phase: &RunPhase) -> bool {
        let mut state = self.lock();
        let Some(poll) = state.current_mut(id, generation) else {
            debug!("Stats cycle {} for {} superseded", generation, id);
            return false;
        };
        if poll.phase != *phase {
            info!("Container {} is now {} (was {})", id, phase, poll.phase);
            poll.phase = phase.clone();
        }
        true
    }

    fn complete_step(&self, id: ContainerId, generation: u64, message: Option<ServerMessage>) {
        let mut state = self.lock();
        let Some(cadence) = state.current_mut(&id, generation).map(|poll| poll.cadence) else {
            debug!("Discarding result of superseded stats cycle {} for {}", generation, id);
            return;
        };

        if let Some(message) = message {
            let delivered = state.publish(&id, &message);
            debug!("Published update for {} to {} subscribers", id, delivered);
        }

        let slot = self.spawn_timer(id.clone(), generation, cadence);
        if let Some(poll) = state.current_mut(&id, generation) {
            poll.slot = slot;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::time::Instant;

    use super::*;
    use crate::application::registry::SlotKind;
    use crate::domain::{ContainerSummary, MetricRecord};
    use crate::ports::{ContainerRuntime, RuntimeError, RuntimeResult};

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Runtime double: phases are settable, snapshots take `delay` of virtual time
    struct MockRuntime {
        phase: Mutex<RunPhase>,
        inspect_fails: AtomicBool,
        delay: Duration,
        scripted: Mutex<VecDeque<RuntimeResult<MetricRecord>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        snapshots: AtomicUsize,
    }

    impl MockRuntime {
        fn new(phase: RunPhase, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                phase: Mutex::new(phase),
                inspect_fails: AtomicBool::new(false),
                delay,
                scripted: Mutex::new(VecDeque::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                snapshots: AtomicUsize::new(0),
            })
        }

        fn set_phase(&self, phase: RunPhase) {
            *self.phase.lock().unwrap() = phase;
        }

        /// Make `inspect` fail the way a removed container does
        fn fail_inspect(&self) {
            self.inspect_fails.store(true, Ordering::SeqCst);
        }

        fn script(&self, result: RuntimeResult<MetricRecord>) {
            self.scripted.lock().unwrap().push_back(result);
        }
    }

    fn record(label: &str) -> MetricRecord {
        let mut record = MetricRecord::unknown(Utc::now());
        record.container_label = label.to_string();
        record.cpu_percent = 12.5;
        record.mem_total_bytes = 536_870_912;
        record.pids = 5;
        record
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>> {
            Ok(Vec::new())
        }

        async fn inspect(&self, _id: &ContainerId) -> RuntimeResult<RunPhase> {
            if self.inspect_fails.load(Ordering::SeqCst) {
                return Err(RuntimeError::Exit {
                    code: Some(1),
                    stderr: "Error: No such object".to_string(),
                });
            }
            Ok(self.phase.lock().unwrap().clone())
        }

        async fn snapshot(&self, id: &ContainerId) -> RuntimeResult<MetricRecord> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(&self.in_flight);
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.snapshots.fetch_add(1, Ordering::SeqCst);

            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let scripted = self.scripted.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(record(id.as_str())))
        }
    }

    fn registry(runtime: &Arc<MockRuntime>) -> SubscriptionRegistry {
        SubscriptionRegistry::new(runtime.clone(), Cadence::default())
    }

    fn connect(registry: &SubscriptionRegistry) -> (crate::domain::SubscriberId, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.connect(tx), rx)
    }

    fn web() -> ContainerId {
        ContainerId::new("web")
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_subscribe_starts_cycle_and_publishes_stats() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::ZERO);
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);

        registry.subscribe(sub, web(), Some(1000));

        match rx.recv().await.unwrap() {
            ServerMessage::Stats { container_id, data, .. } => {
                assert_eq!(container_id, web());
                assert_eq!(data.pids, 5);
                assert_eq!(data.cpu_percent, 12.5);
            }
            other => panic!("expected stats, got {:?}", other),
        }

        let info = registry.poll_info(&web()).unwrap();
        assert_eq!(info.subscribers, 1);
        assert_eq!(info.phase, RunPhase::Running);
        assert_eq!(info.slot, SlotKind::PendingTimer);
        assert_eq!(registry.active_streams(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_keeps_one_cycle_and_applies_cadence_on_next_rearm() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::ZERO);
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);

        registry.subscribe(sub, web(), Some(1000));
        rx.recv().await.unwrap();
        let generation = registry.poll_info(&web()).unwrap().generation;

        // the timer already armed keeps its 1000ms
        registry.subscribe(sub, web(), Some(5000));
        let info = registry.poll_info(&web()).unwrap();
        assert_eq!(info.generation, generation);
        assert_eq!(info.subscribers, 1);
        assert_eq!(info.cadence, Cadence::from_millis(5000));

        let start = Instant::now();
        rx.recv().await.unwrap();
        let second = Instant::now();
        rx.recv().await.unwrap();
        let third = Instant::now();

        let first_gap = second - start;
        let second_gap = third - second;
        assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1100));
        assert!(second_gap >= Duration::from_millis(5000) && second_gap < Duration::from_millis(5100));
        assert_eq!(registry.poll_info(&web()).unwrap().generation, generation);
        assert_eq!(runtime.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_container_never_polls_concurrently() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::from_millis(300));
        let registry = registry(&runtime);
        let (first, mut first_rx) = connect(&registry);
        let (second, mut second_rx) = connect(&registry);

        registry.subscribe(first, web(), Some(100));
        registry.subscribe(second, web(), Some(100));
        registry.subscribe(first, web(), Some(50));

        for _ in 0..5 {
            assert!(matches!(first_rx.recv().await, Some(ServerMessage::Stats { .. })));
            assert!(matches!(second_rx.recv().await, Some(ServerMessage::Stats { .. })));
        }
        assert_eq!(runtime.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(registry.poll_info(&web()).unwrap().subscribers, 2);

        // one subscriber leaving does not disturb the cycle
        let generation = registry.poll_info(&web()).unwrap().generation;
        registry.unsubscribe(first, &web());
        assert!(second_rx.recv().await.is_some());
        assert_eq!(registry.poll_info(&web()).unwrap().generation, generation);
        assert_eq!(runtime.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_containers_poll_concurrently() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::from_millis(200));
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);

        registry.subscribe(sub, web(), None);
        registry.subscribe(sub, ContainerId::new("db"), None);

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(runtime.max_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(registry.active_streams(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribing_last_subscriber_goes_silent() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::ZERO);
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);

        registry.subscribe(sub, web(), Some(500));
        rx.recv().await.unwrap();

        registry.unsubscribe(sub, &web());
        assert!(registry.poll_info(&web()).is_none());

        sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(runtime.snapshots.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_cancels_in_flight_snapshot() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::from_millis(500));
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);

        registry.subscribe(sub, web(), Some(100));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.poll_info(&web()).unwrap().slot, SlotKind::ActivePoll);
        assert_eq!(runtime.in_flight.load(Ordering::SeqCst), 1);

        registry.unsubscribe(sub, &web());
        sleep(Duration::from_millis(1)).await;
        assert_eq!(runtime.in_flight.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(runtime.snapshots.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarted_cycle_gets_new_generation_and_old_result_is_dropped() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::from_millis(500));
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);

        registry.subscribe(sub, web(), Some(10_000));
        let old = registry.poll_info(&web()).unwrap().generation;
        sleep(Duration::from_millis(100)).await;
        registry.unsubscribe(sub, &web());
        registry.subscribe(sub, web(), Some(10_000));
        let new = registry.poll_info(&web()).unwrap().generation;
        assert!(new > old);

        let start = Instant::now();
        rx.recv().await.unwrap();
        // only the restarted poll, begun at t=100ms, delivers
        assert!(Instant::now() - start >= Duration::from_millis(500));
        sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_container_reports_status_then_stats_once_running() {
        let runtime = MockRuntime::new(RunPhase::Exited, Duration::ZERO);
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);

        registry.subscribe(sub, web(), Some(1000));
        match rx.recv().await.unwrap() {
            ServerMessage::Status { container_id, status, .. } => {
                assert_eq!(container_id, web());
                assert_eq!(status, "exited");
            }
            other => panic!("expected status, got {:?}", other),
        }
        assert_eq!(runtime.snapshots.load(Ordering::SeqCst), 0);

        runtime.set_phase(RunPhase::Running);
        assert!(matches!(rx.recv().await, Some(ServerMessage::Stats { .. })));
        assert_eq!(registry.poll_info(&web()).unwrap().phase, RunPhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_inspect_reports_unknown_status_and_keeps_cycling() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::ZERO);
        runtime.fail_inspect();
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);
        let gone = ContainerId::new("gone");

        registry.subscribe(sub, gone.clone(), Some(100));

        let mut seen = Vec::new();
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                ServerMessage::Status { container_id, status, .. } => {
                    assert_eq!(container_id, gone);
                    assert_eq!(status, "unknown");
                }
                other => panic!("expected status, got {:?}", other),
            }
            seen.push(Instant::now());
        }

        for gap in [seen[1] - seen[0], seen[2] - seen[1]] {
            assert!(gap >= Duration::from_millis(100) && gap < Duration::from_millis(110));
        }
        assert_eq!(registry.active_streams(), 1);
        assert_eq!(registry.poll_info(&gone).unwrap().phase, RunPhase::Unknown);
        assert_eq!(runtime.snapshots.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_and_undecodable_snapshots_skip_a_tick() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::ZERO);
        runtime.script(Err(RuntimeError::EmptyOutput));
        runtime.script(Err(RuntimeError::Format("web --".to_string())));
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);

        let start = Instant::now();
        registry.subscribe(sub, web(), Some(1000));

        match rx.recv().await.unwrap() {
            ServerMessage::Stats { data, .. } => assert_eq!(data.container_label, "web"),
            other => panic!("expected stats, got {:?}", other),
        }
        assert!(Instant::now() - start >= Duration::from_millis(2000));
        assert_eq!(runtime.snapshots.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_revokes_everything_without_resurrection() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::ZERO);
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);
        let (other, mut other_rx) = connect(&registry);
        let db = ContainerId::new("db");

        registry.subscribe(sub, web(), Some(100));
        registry.subscribe(sub, db.clone(), Some(100));
        registry.subscribe(other, db.clone(), Some(100));
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        registry.disconnect(sub);
        assert!(registry.poll_info(&web()).is_none());
        assert_eq!(registry.poll_info(&db).unwrap().subscribers, 1);

        // a late subscribe from the closed connection is ignored
        registry.subscribe(sub, web(), Some(100));
        assert!(registry.poll_info(&web()).is_none());
        assert_eq!(registry.active_streams(), 1);

        // the connection's outbox is gone once queued frames drain
        while rx.recv().await.is_some() {}
        assert!(other_rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_all_streams() {
        let runtime = MockRuntime::new(RunPhase::Running, Duration::from_millis(100));
        let registry = registry(&runtime);
        let (sub, mut rx) = connect(&registry);

        registry.subscribe(sub, web(), None);
        registry.subscribe(sub, ContainerId::new("db"), None);
        registry.shutdown();

        assert_eq!(registry.active_streams(), 0);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(runtime.in_flight.load(Ordering::SeqCst), 0);
        assert!(rx.recv().await.is_none());
    }
}
