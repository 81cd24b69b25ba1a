//! Queue adapter: turns received task events into processing work

use crate::observability::metrics::{metrics, EventSource};
use crate::protocol::{TaskContext, TaskEvent};
use crate::workflow::TaskService;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, Instrument};

/// Capacity of the channel between the transport and the consumer
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

pub fn create_event_channel() -> (mpsc::Sender<TaskEvent>, mpsc::Receiver<TaskEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Processes every received event concurrently, one task per event
pub struct EventConsumer {
    service: TaskService,
    receiver: mpsc::Receiver<TaskEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl EventConsumer {
    pub fn new(
        service: TaskService,
        receiver: mpsc::Receiver<TaskEvent>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            receiver,
            shutdown_rx,
        }
    }

    /// Run until shutdown or until every sender is gone
    ///
    /// Events already handed to a task are allowed to finish.
    pub async fn run(mut self) {
        info!("event consumer started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                received = self.receiver.recv() => {
                    let Some(event) = received else { break };
                    in_flight.spawn(Self::process(self.service.clone(), event));
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "event task aborted");
                    }
                }
            }
        }

        let pending = in_flight.len();
        if pending > 0 {
            debug!(pending, "draining in-flight events");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "event task aborted");
            }
        }
        info!("event consumer stopped");
    }

    async fn process(service: TaskService, event: TaskEvent) {
        metrics().event_received(EventSource::Queue);
        let span = crate::task_span!(
            task_id = %event.task_id(),
            duration_ms = event.duration_ms(),
            source = "queue"
        );

        async move {
            match service.handle(TaskContext::process_task(event)).await {
                Ok(_) => debug!("queued event processed"),
                Err(e) => error!(error = %e, "queued event failed"),
            }
        }
        .instrument(span)
        .await
    }
}
