//! Per-job progress fan-out

use futures::stream::{self, Stream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::job::{JobId, Stage, StageTransition};
use crate::sync::lock;

/// Per-job broadcast channels for stage transitions.
///
/// Publishing never waits on subscribers: a subscriber that falls more than
/// `buffer` events behind skips the ones it missed. The channel of a job is
/// dropped after its terminal event, which closes every subscription.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    channels: Arc<Mutex<HashMap<JobId, broadcast::Sender<StageTransition>>>>,
    buffer: usize,
}

impl ProgressBroadcaster {
    /// Create a broadcaster buffering up to `buffer` events per job
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Subscribe to future transitions of a job.
    ///
    /// Registers a channel for any id; callers outside the crate go through
    /// `Orchestrator::subscribe`, which prunes it again for unknown jobs.
    pub(crate) fn subscribe(&self, job_id: &JobId) -> Subscription {
        let mut channels = lock(&self.channels);
        let receiver = channels
            .entry(job_id.clone())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe();
        Subscription { receiver }
    }

    /// Deliver a transition to current subscribers.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, event: StageTransition) -> usize {
        let mut channels = lock(&self.channels);
        let Some(sender) = channels.get(&event.job_id) else {
            trace!(job_id = %event.job_id, stage = %event.stage, "no subscribers for transition");
            return 0;
        };

        let job_id = event.job_id.clone();
        let terminal = event.stage.is_terminal();
        let delivered = sender.send(event).unwrap_or(0);

        if terminal || sender.receiver_count() == 0 {
            channels.remove(&job_id);
        }
        delivered
    }

    /// Drop the channel of a job, ending its subscriptions
    pub fn remove(&self, job_id: &JobId) -> bool {
        let removed = lock(&self.channels).remove(job_id).is_some();
        if removed {
            debug!(%job_id, "closed progress channel");
        }
        removed
    }

    /// Drop the channel of a job if nobody listens to it any more
    pub fn prune(&self, job_id: &JobId) {
        let mut channels = lock(&self.channels);
        if channels.get(job_id).is_some_and(|sender| sender.receiver_count() == 0) {
            channels.remove(job_id);
        }
    }

    /// Live subscribers of a job
    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        lock(&self.channels)
            .get(job_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Jobs that currently have a channel
    pub fn tracked_jobs(&self) -> usize {
        lock(&self.channels).len()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SUBSCRIBER_BUFFER)
    }
}

/// Receiving end for one job's transitions
#[derive(Debug)]
pub(crate) struct Subscription {
    receiver: broadcast::Receiver<StageTransition>,
}

impl Subscription {
    /// Next transition; `None` once the channel is closed
    pub(crate) async fn recv(&mut self) -> Option<StageTransition> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Ordered view of a job's progress: the state at subscription time, then
/// every later transition, ending after `DONE` or `ERROR`.
#[derive(Debug)]
pub struct ProgressStream {
    pending: Option<StageTransition>,
    subscription: Option<Subscription>,
    last_stage: Option<Stage>,
    finished: bool,
}

impl ProgressStream {
    pub(crate) fn new(snapshot: StageTransition, subscription: Option<Subscription>) -> Self {
        Self {
            pending: Some(snapshot),
            subscription,
            last_stage: None,
            finished: false,
        }
    }

    /// Next event, or `None` once the job has reached a terminal stage
    pub async fn next(&mut self) -> Option<StageTransition> {
        if self.finished {
            return None;
        }

        let event = match self.pending.take() {
            Some(snapshot) => Some(snapshot),
            None => self.next_newer().await,
        };

        match event {
            Some(event) => {
                self.last_stage = Some(event.stage);
                if event.stage.is_terminal() {
                    self.finish();
                }
                Some(event)
            }
            None => {
                self.finish();
                None
            }
        }
    }

    /// Drain the remaining events into a `Vec`
    pub async fn collect(mut self) -> Vec<StageTransition> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    /// Adapt into a `futures::Stream`
    pub fn into_stream(self) -> impl Stream<Item = StageTransition> + Send {
        stream::unfold(self, |mut progress| async move {
            progress.next().await.map(|event| (event, progress))
        })
    }

    async fn next_newer(&mut self) -> Option<StageTransition> {
        let subscription = self.subscription.as_mut()?;
        loop {
            let event = subscription.recv().await?;
            if self.last_stage.map_or(true, |last| event.stage > last) {
                return Some(event);
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.subscription = None;
    }
}
