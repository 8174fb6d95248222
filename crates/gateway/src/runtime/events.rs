//! Event Bus — per-connection sequencing and gap reporting over a run's
//! broadcast channel.
//!
//! `RunStore`'s `tokio::sync::broadcast::Sender<RunEvent>` already gives
//! every run multicast fan-out: many connections (multiple SSE clients,
//! eventually RPC subscribers) can watch the same run_id independently.
//! What it doesn't give a connection is a stable `seq` to detect gaps by,
//! or an explicit marker when it falls behind — a lagged receiver just
//! silently skips ahead. This module wraps one connection's view of that
//! channel with both.
//!
//! Backpressure policy: run lifecycle transitions (`RunStatus`) and node
//! failures are the only events a client strictly needs to reach a
//! correct final state, so they're treated as critical. Everything else
//! (node start/complete, log, usage) is a delta — safe to lose, since a
//! later lifecycle event still carries the authoritative outcome.
//!
//! `broadcast`'s ring buffer can still lap a slow connection and drop a
//! critical event along with the deltas around it — the channel itself
//! has no notion of criticality. Rather than size the buffer and hope, a
//! lagged sink resyncs: it asks `RunStore` for the run's current
//! authoritative status and queues that as the very next frame, so the
//! client always eventually observes the real outcome even if the live
//! `RunStatus`/`NodeFailed` event that announced it was dropped.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::runs::{RunEvent, RunStore};

/// `true` for events a subscriber must not silently miss.
pub fn is_critical(event: &RunEvent) -> bool {
    matches!(event, RunEvent::RunStatus { .. } | RunEvent::NodeFailed { .. })
}

/// One frame delivered to a subscribed connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusFrame {
    Event { seq: u64, event: RunEvent },
    /// The connection fell behind and `skipped` events were lost before
    /// this point. `seq` still advances so gaps are detectable.
    Gap { seq: u64, skipped: u64 },
}

impl BusFrame {
    pub fn seq(&self) -> u64 {
        match self {
            BusFrame::Event { seq, .. } | BusFrame::Gap { seq, .. } => *seq,
        }
    }

    /// The event name for wire framing (`"gap"` for gap markers).
    pub fn event_name(&self) -> &'static str {
        match self {
            BusFrame::Event { event, .. } => match event {
                RunEvent::RunStatus { .. } => "run.status",
                RunEvent::NodeStarted { .. } => "node.started",
                RunEvent::NodeCompleted { .. } => "node.completed",
                RunEvent::NodeFailed { .. } => "node.failed",
                RunEvent::Log { .. } => "log",
                RunEvent::Usage { .. } => "usage",
            },
            BusFrame::Gap { .. } => "gap",
        }
    }

    /// Whether the run is known to be finished after this frame —
    /// subscribers should stop reading once they see this.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BusFrame::Event {
                event: RunEvent::RunStatus { status, .. },
                ..
            } if status.is_terminal()
        )
    }
}

/// A single connection's sequenced view over one run's events.
pub struct ConnectionSink {
    rx: broadcast::Receiver<RunEvent>,
    seq: u64,
    run_id: Uuid,
    run_store: Arc<RunStore>,
    /// A resync frame queued by a prior `Lagged` and not yet delivered.
    pending: Option<BusFrame>,
}

impl ConnectionSink {
    pub fn new(rx: broadcast::Receiver<RunEvent>, run_id: Uuid, run_store: Arc<RunStore>) -> Self {
        Self {
            rx,
            seq: 0,
            run_id,
            run_store,
            pending: None,
        }
    }

    /// Wait for the next frame. Returns `None` once the run is over and
    /// the channel has no more senders.
    pub async fn next_frame(&mut self) -> Option<BusFrame> {
        if let Some(frame) = self.pending.take() {
            return Some(frame);
        }

        match self.rx.recv().await {
            Ok(event) => {
                self.seq += 1;
                Some(BusFrame::Event {
                    seq: self.seq,
                    event,
                })
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                self.seq += 1;
                let gap = BusFrame::Gap {
                    seq: self.seq,
                    skipped,
                };

                // Resync: whatever critical event the lag may have
                // swallowed, the run's current status is still the
                // authoritative outcome. Queue it so it's the very next
                // frame this connection sees.
                if let Some(run) = self.run_store.get(&self.run_id) {
                    self.seq += 1;
                    self.pending = Some(BusFrame::Event {
                        seq: self.seq,
                        event: RunEvent::RunStatus {
                            run_id: self.run_id,
                            status: run.status,
                        },
                    });
                }

                Some(gap)
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// Hands out connection-scoped sinks over `RunStore`'s per-run channels.
pub struct EventBus {
    run_store: Arc<RunStore>,
}

impl EventBus {
    pub fn new(run_store: Arc<RunStore>) -> Self {
        Self { run_store }
    }

    pub fn subscribe(&self, run_id: &Uuid) -> ConnectionSink {
        let rx = self.run_store.subscribe(run_id);
        ConnectionSink::new(rx, *run_id, self.run_store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::runs::RunStatus;

    fn status_event(status: RunStatus) -> RunEvent {
        RunEvent::RunStatus {
            run_id: uuid::Uuid::new_v4(),
            status,
        }
    }

    #[test]
    fn critical_classification_matches_lifecycle_and_failures() {
        assert!(is_critical(&status_event(RunStatus::Completed)));
        assert!(is_critical(&RunEvent::NodeFailed {
            run_id: uuid::Uuid::new_v4(),
            node: crate::runtime::runs::RunNode {
                node_id: 1,
                kind: crate::runtime::runs::NodeKind::ToolCall,
                name: "t".into(),
                status: RunStatus::Failed,
                started_at: chrono::Utc::now(),
                ended_at: None,
                duration_ms: None,
                input_preview: None,
                output_preview: None,
                is_error: true,
                input_tokens: 0,
                output_tokens: 0,
            },
        }));
        assert!(!is_critical(&RunEvent::Usage {
            run_id: uuid::Uuid::new_v4(),
            input_tokens: 1,
            output_tokens: 1,
            total_tokens: 2,
        }));
    }

    /// A `RunStore` with one run inserted, for resync-on-lag tests.
    fn store_with_run(status: RunStatus) -> (Arc<RunStore>, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RunStore::new(dir.path()));
        let run = crate::runtime::runs::Run::new("sk".into(), "sid".into(), "hi");
        let run_id = store.insert(run);
        store.update(&run_id, |r| r.status = status);
        (store, run_id)
    }

    #[tokio::test]
    async fn seq_increments_per_connection_independently() {
        let (store, run_id) = store_with_run(RunStatus::Running);
        let (tx, rx1) = broadcast::channel(16);
        let rx2 = tx.subscribe();
        let mut sink1 = ConnectionSink::new(rx1, run_id, store.clone());
        let mut sink2 = ConnectionSink::new(rx2, run_id, store);

        tx.send(status_event(RunStatus::Running)).unwrap();
        tx.send(status_event(RunStatus::Completed)).unwrap();

        let f1 = sink1.next_frame().await.unwrap();
        let f2 = sink1.next_frame().await.unwrap();
        assert_eq!(f1.seq(), 1);
        assert_eq!(f2.seq(), 2);
        assert!(f2.is_terminal());

        // The second subscriber sees its own seq sequence starting at 1 too.
        let g1 = sink2.next_frame().await.unwrap();
        assert_eq!(g1.seq(), 1);
    }

    #[tokio::test]
    async fn lag_reports_a_gap_frame_instead_of_silently_skipping() {
        let (store, run_id) = store_with_run(RunStatus::Running);
        let (tx, rx) = broadcast::channel(2);
        let mut sink = ConnectionSink::new(rx, run_id, store);

        // Overflow the channel before the sink ever reads.
        for _ in 0..5 {
            let _ = tx.send(status_event(RunStatus::Running));
        }

        let frame = sink.next_frame().await.unwrap();
        assert!(matches!(frame, BusFrame::Gap { .. }));
    }

    #[tokio::test]
    async fn lag_queues_the_run_s_current_status_right_after_the_gap() {
        let (store, run_id) = store_with_run(RunStatus::Completed);
        let (tx, rx) = broadcast::channel(2);
        let mut sink = ConnectionSink::new(rx, run_id, store);

        for _ in 0..5 {
            let _ = tx.send(status_event(RunStatus::Running));
        }

        let gap = sink.next_frame().await.unwrap();
        assert!(matches!(gap, BusFrame::Gap { .. }));

        // Even though every live event was dropped by the lag, the
        // connection still learns the run finished.
        let resync = sink.next_frame().await.unwrap();
        match resync {
            BusFrame::Event {
                event: RunEvent::RunStatus { status, .. },
                ..
            } => assert_eq!(status, RunStatus::Completed),
            other => panic!("expected a resynced run.status event, got {other:?}"),
        }
        assert!(resync.is_terminal());
    }

    #[tokio::test]
    async fn closed_channel_ends_the_stream() {
        let (store, run_id) = store_with_run(RunStatus::Running);
        let (tx, rx) = broadcast::channel::<RunEvent>(4);
        let mut sink = ConnectionSink::new(rx, run_id, store);
        drop(tx);
        assert!(sink.next_frame().await.is_none());
    }
}
