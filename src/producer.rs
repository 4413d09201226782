//! Supervision of agent executor hooks running as independent tasks.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event_queue::EventQueue;
use crate::types::{Event, Message, Role, TaskState, TaskStatus, TaskStatusUpdateEvent};

/// Spawn an executor hook writing into `queue`.
///
/// The hook is raced against `cancellation` and dropped at its next
/// suspension point once the token fires. An error or panic from the hook
/// is reported on the queue as a final `failed` status update. The queue is
/// closed when the hook ends, however it ends.
pub fn spawn_producer<F>(
    name: String,
    task_id: Uuid,
    context_id: Uuid,
    queue: Arc<EventQueue>,
    cancellation: CancellationToken,
    hook: F,
) -> ProducerHandle
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let producer_name = name.clone();
    let token = cancellation.clone();
    let handle = tokio::spawn(async move {
        let _close = CloseOnDrop(queue.clone());

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = AssertUnwindSafe(hook).catch_unwind() => Some(result),
        };

        let failure = match outcome {
            None => {
                info!("Producer {} observed cancellation", producer_name);
                return;
            }
            Some(Ok(Ok(()))) => return,
            Some(Ok(Err(e))) => format!("{:#}", e),
            Some(Err(panic)) => panic_message(&*panic),
        };

        error!("Producer {} failed: {}", producer_name, failure);
        let message = Message::text(Role::Agent, failure).for_task(task_id, context_id);
        let event = Event::StatusUpdate(TaskStatusUpdateEvent::new(
            task_id,
            context_id,
            TaskStatus::with_message(TaskState::Failed, message),
            true,
        ));
        if queue.enqueue(event).is_err() {
            warn!("Producer {} failed after its consumer went away", producer_name);
        }
    });

    ProducerHandle {
        name,
        cancellation,
        handle: Some(handle),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "agent executor panicked".to_string()
    }
}

struct CloseOnDrop(Arc<EventQueue>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Handle to a running producer.
///
/// [`ProducerHandle::finish`] cancels the producer if it is still running
/// and waits for it. Dropping an unfinished handle cancels the producer and
/// reaps it in the background.
pub struct ProducerHandle {
    name: String,
    cancellation: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProducerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the producer if needed and wait until it has stopped
    pub async fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                self.cancellation.cancel();
            }
            reap(&self.name, handle).await;
        }
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.cancellation.cancel();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { reap(&name, handle).await });
            }
            Err(_) => handle.abort(),
        }
    }
}

async fn reap(name: &str, handle: JoinHandle<()>) {
    match handle.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => info!("Producer {} was cancelled", name),
        Err(e) => error!("Error in producer {}: {}", name, e),
    }
}

/// Cancellation tokens of the producers currently working on each task.
///
/// Every producer gets a child of its task's token, so cancelling a task
/// stops all of its producers at once.
#[derive(Default)]
pub struct ProducerRegistry {
    tasks: Mutex<HashMap<Uuid, RegisteredTask>>,
    generation: AtomicU64,
}

struct RegisteredTask {
    token: CancellationToken,
    generation: u64,
    count: usize,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new producer for `task_id`.
    ///
    /// The registration is released when the returned guard is dropped.
    pub fn register(self: &Arc<Self>, task_id: Uuid) -> Registration {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let entry = tasks.entry(task_id).or_insert_with(|| RegisteredTask {
            token: CancellationToken::new(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
            count: 0,
        });
        entry.count += 1;

        Registration {
            registry: self.clone(),
            task_id,
            generation: entry.generation,
            token: entry.token.child_token(),
        }
    }

    /// Cancel every producer registered for `task_id`; returns whether any was
    pub fn cancel(&self, task_id: Uuid) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.remove(&task_id) {
            Some(entry) => {
                info!(
                    "Cancelling {} running producer(s) for task {}",
                    entry.count, task_id
                );
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running(&self, task_id: Uuid) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.get(&task_id).map_or(0, |entry| entry.count)
    }

    fn release(&self, task_id: Uuid, generation: u64) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = tasks.get_mut(&task_id) {
            if entry.generation != generation {
                return;
            }
            entry.count -= 1;
            if entry.count == 0 {
                tasks.remove(&task_id);
            }
        }
    }
}

/// A producer's place in the [`ProducerRegistry`]
pub struct Registration {
    registry: Arc<ProducerRegistry>,
    task_id: Uuid,
    generation: u64,
    token: CancellationToken,
}

impl Registration {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(self.task_id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn ids() -> (Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_queue_closed_after_success() {
        let (task_id, context_id) = ids();
        let queue = Arc::new(EventQueue::new());
        let handle = spawn_producer(
            "ok".to_string(),
            task_id,
            context_id,
            queue.clone(),
            CancellationToken::new(),
            async { Ok(()) },
        );

        assert!(queue.dequeue().await.is_none());
        assert!(queue.is_closed());
        handle.finish().await;
    }

    #[tokio::test]
    async fn test_error_becomes_failed_status() {
        let (task_id, context_id) = ids();
        let queue = Arc::new(EventQueue::new());
        let handle = spawn_producer(
            "failing".to_string(),
            task_id,
            context_id,
            queue.clone(),
            CancellationToken::new(),
            async { Err(anyhow::anyhow!("upstream API unavailable")) },
        );

        match queue.dequeue().await {
            Some(Event::StatusUpdate(update)) => {
                assert!(update.is_final);
                assert_eq!(update.status.state, TaskState::Failed);
                let message = update.status.message.unwrap();
                assert_eq!(message.text_content(), "upstream API unavailable");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(queue.dequeue().await.is_none());
        handle.finish().await;
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_status() {
        let (task_id, context_id) = ids();
        let queue = Arc::new(EventQueue::new());
        let handle = spawn_producer(
            "panicking".to_string(),
            task_id,
            context_id,
            queue.clone(),
            CancellationToken::new(),
            async move {
                if task_id != Uuid::nil() {
                    panic!("boom");
                }
                Ok(())
            },
        );

        match queue.dequeue().await {
            Some(Event::StatusUpdate(update)) => {
                assert_eq!(update.status.state, TaskState::Failed);
                assert_eq!(update.status.message.unwrap().text_content(), "boom");
            }
            other => panic!("unexpected event {:?}", other),
        }
        handle.finish().await;
    }

    #[tokio::test]
    async fn test_finish_cancels_running_producer() {
        let (task_id, context_id) = ids();
        let queue = Arc::new(EventQueue::new());
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();

        let handle = spawn_producer(
            "slow".to_string(),
            task_id,
            context_id,
            queue.clone(),
            CancellationToken::new(),
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
        );

        tokio::time::timeout(Duration::from_secs(1), handle.finish())
            .await
            .expect("finish should not wait for the slow hook");
        assert!(!completed.load(Ordering::SeqCst));
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_producer() {
        let (task_id, context_id) = ids();
        let queue = Arc::new(EventQueue::new());
        let handle = spawn_producer(
            "dropped".to_string(),
            task_id,
            context_id,
            queue.clone(),
            CancellationToken::new(),
            futures::future::pending(),
        );
        drop(handle);

        let closed = tokio::time::timeout(Duration::from_secs(1), queue.dequeue()).await;
        assert!(matches!(closed, Ok(None)));
    }

    #[tokio::test]
    async fn test_registry_cancels_all_producers_of_a_task() {
        let registry = Arc::new(ProducerRegistry::new());
        let task_id = Uuid::new_v4();
        let first = registry.register(task_id);
        let second = registry.register(task_id);
        assert_eq!(registry.running(task_id), 2);

        drop(second);
        assert_eq!(registry.running(task_id), 1);

        assert!(registry.cancel(task_id));
        assert!(first.token().is_cancelled());
        assert_eq!(registry.running(task_id), 0);
        assert!(!registry.cancel(task_id));
    }

    #[tokio::test]
    async fn test_stale_registration_does_not_release_new_entry() {
        let registry = Arc::new(ProducerRegistry::new());
        let task_id = Uuid::new_v4();
        let stale = registry.register(task_id);
        registry.cancel(task_id);

        let fresh = registry.register(task_id);
        drop(stale);
        assert_eq!(registry.running(task_id), 1);
        assert!(!fresh.token().is_cancelled());
    }
}
