//! Ordered, closable channel carrying agent events to a single consumer.

use std::sync::Mutex;

use log::debug;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{A2AError, A2AResult};
use crate::types::Event;

/// FIFO queue of [`Event`]s created fresh for each request.
///
/// The producer side enqueues without ever blocking; the consumer side
/// suspends on [`EventQueue::dequeue`] until an event arrives or the queue
/// is closed. Events buffered before [`EventQueue::close`] are still
/// delivered, after which `dequeue` returns `None`.
pub struct EventQueue {
    sender: Mutex<Option<UnboundedSender<Event>>>,
    receiver: tokio::sync::Mutex<UnboundedReceiver<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        debug!("EventQueue initialized");
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    /// Append an event; fails once the queue has been closed
    pub fn enqueue(&self, event: Event) -> A2AResult<()> {
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let sender = guard.as_ref().ok_or(A2AError::QueueClosed)?;
        debug!("Enqueuing {} event", event.kind());
        sender.send(event).map_err(|_| A2AError::QueueClosed)
    }

    /// Wait for the next event, or `None` once the queue is closed and drained
    pub async fn dequeue(&self) -> Option<Event> {
        let mut receiver = self.receiver.lock().await;
        let event = receiver.recv().await;
        match &event {
            Some(event) => debug!("Dequeued {} event", event.kind()),
            None => debug!("EventQueue closed, no more events"),
        }
        event
    }

    /// Signal end-of-stream. Calling it more than once has no effect.
    pub fn close(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            debug!("EventQueue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::assert_err;
    use uuid::Uuid;

    use crate::types::{Message, Role};

    fn message(text: &str) -> Event {
        Event::Message(Message::text(Role::Agent, text))
    }

    fn text_of(event: Event) -> String {
        match event {
            Event::Message(message) => message.text_content(),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_events_are_delivered_in_order() {
        let queue = EventQueue::new();
        for i in 0..10 {
            queue.enqueue(message(&i.to_string())).unwrap();
        }
        queue.close();

        let mut seen = Vec::new();
        while let Some(event) = queue.dequeue().await {
            seen.push(text_of(event));
        }
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_close_wakes_pending_dequeue() {
        let queue = Arc::new(EventQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("dequeue should return after close")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_new_events() {
        let queue = EventQueue::new();
        queue.enqueue(message("before")).unwrap();
        queue.close();
        queue.close();

        assert!(queue.is_closed());
        assert_err!(queue.enqueue(message("after")));
        assert_eq!(text_of(queue.dequeue().await.unwrap()), "before");
        assert!(queue.dequeue().await.is_none());
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_event_is_never_delivered_twice() {
        let queue = Arc::new(EventQueue::new());
        let id = Uuid::new_v4();
        let mut event = Message::text(Role::Agent, "once");
        event.task_id = Some(id);
        queue.enqueue(Event::Message(event)).unwrap();

        let first = queue.dequeue().await;
        assert!(first.is_some());

        let second = tokio::time::timeout(Duration::from_millis(50), queue.dequeue()).await;
        assert!(second.is_err(), "queue should be empty and still open");
    }
}
