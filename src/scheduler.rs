//! Named deferred tasks.
//!
//! A task is identified by the event it belongs to and its kind, so there is at
//! most one live task per `(event, kind)`. Arming a key that is already armed
//! replaces the previous task. Timers never run any logic themselves: when they
//! expire they send a [`Firing`] on a channel, and the single consumer of that
//! channel asks [`Scheduler::claim`] whether the firing is still current before
//! running the callback. A firing of a task that was disarmed or re-armed in the
//! meantime is rejected.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use chrono::{DateTime, Utc};
use log::debug;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{sleep, Duration},
};

use crate::{error::SchedulerError, types::EventId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Reminder,
    Feedback,
    DailyReviewNag,
}

pub const ALL_TASK_KINDS: [TaskKind; 3] = [
    TaskKind::Reminder,
    TaskKind::Feedback,
    TaskKind::DailyReviewNag,
];

type TaskKey = (EventId, TaskKind);

/// A timer that expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Firing {
    pub event_id: EventId,
    pub kind: TaskKind,
    generation: u64,
}

struct ArmedTask {
    generation: u64,
    repeating: bool,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    tasks: Mutex<HashMap<TaskKey, ArmedTask>>,
    next_generation: AtomicU64,
    sender: UnboundedSender<Firing>,
}

/// Handle to the armed tasks. Clones share the same tasks.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TaskKind::Reminder => "reminder",
            TaskKind::Feedback => "feedback",
            TaskKind::DailyReviewNag => "daily review nag",
        };
        write!(f, "{name}")
    }
}

impl Scheduler {
    /// Create a scheduler together with the receiving end of its firings.
    pub fn new() -> (Scheduler, UnboundedReceiver<Firing>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler = Scheduler {
            inner: Arc::new(SchedulerInner {
                tasks: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                sender,
            }),
        };
        (scheduler, receiver)
    }

    /// Arm a task that fires once at *at*, or immediately if *at* is in the past.
    pub fn arm_once(
        &self,
        event_id: EventId,
        kind: TaskKind,
        at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        self.arm(event_id, kind, at, false)
    }

    /// Arm a task that fires at *first_at* and then every 24 hours.
    pub fn arm_daily(
        &self,
        event_id: EventId,
        kind: TaskKind,
        first_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        self.arm(event_id, kind, first_at, true)
    }

    fn arm(
        &self,
        event_id: EventId,
        kind: TaskKind,
        at: DateTime<Utc>,
        repeating: bool,
    ) -> Result<(), SchedulerError> {
        if self.inner.sender.is_closed() {
            return Err(SchedulerError::Closed(format!("{kind} of event {event_id}")));
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let firing = Firing {
            event_id,
            kind,
            generation,
        };
        let sender = self.inner.sender.clone();

        let handle = if repeating {
            tokio::spawn(async move {
                let mut next = at;
                loop {
                    sleep_until(next).await;
                    if sender.send(firing).is_err() {
                        break;
                    }
                    let now = Utc::now();
                    while next <= now {
                        match next.checked_add_signed(chrono::Duration::days(1)) {
                            Some(n) => next = n,
                            None => return,
                        }
                    }
                }
            })
        } else {
            tokio::spawn(async move {
                sleep_until(at).await;
                // Nobody to notify if the receiver is gone.
                let _ = sender.send(firing);
            })
        };

        let previous = self.tasks().insert(
            (event_id, kind),
            ArmedTask {
                generation,
                repeating,
                handle,
            },
        );
        if let Some(previous) = previous {
            debug!("Replacing {kind} of event {event_id}");
            previous.handle.abort();
        }
        debug!("Armed {kind} of event {event_id} at {at}");
        Ok(())
    }

    /// Disarm a task. Returns false if it was not armed.
    pub fn disarm(&self, event_id: EventId, kind: TaskKind) -> bool {
        match self.tasks().remove(&(event_id, kind)) {
            Some(task) => {
                task.handle.abort();
                debug!("Disarmed {kind} of event {event_id}");
                true
            }
            None => false,
        }
    }

    /// Disarm all tasks of the event.
    pub fn disarm_event(&self, event_id: EventId) {
        for kind in ALL_TASK_KINDS {
            self.disarm(event_id, kind);
        }
    }

    pub fn is_armed(&self, event_id: EventId, kind: TaskKind) -> bool {
        self.tasks().contains_key(&(event_id, kind))
    }

    pub fn armed_count(&self) -> usize {
        self.tasks().len()
    }

    /// Check that the firing belongs to the task currently armed for its key.
    ///
    /// A one-shot task is forgotten once claimed, a daily task stays armed.
    pub fn claim(&self, firing: &Firing) -> bool {
        let key = (firing.event_id, firing.kind);
        let mut tasks = self.tasks();
        match tasks.get(&key) {
            Some(task) if task.generation == firing.generation => {
                if !task.repeating {
                    tasks.remove(&key);
                }
                true
            }
            _ => false,
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskKey, ArmedTask>> {
        // The map is consistent after every statement, so a poisoned lock is still usable.
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn sleep_until(at: DateTime<Utc>) {
    let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    sleep(delay).await;
}
