use thiserror::Error;
use tokio::sync::mpsc;

use taskrun_core::domain::task::TaskId;

/// The queue carries task ids only; the worker reloads the full record from
/// storage so the queued message can never go stale.
#[derive(Clone)]
pub struct TaskQueue {
    sender: Sender,
}

#[derive(Clone)]
enum Sender {
    Unbounded(mpsc::UnboundedSender<TaskId>),
    Bounded(mpsc::Sender<TaskId>),
}

pub struct TaskQueueReceiver {
    receiver: Receiver,
}

enum Receiver {
    Unbounded(mpsc::UnboundedReceiver<TaskId>),
    Bounded(mpsc::Receiver<TaskId>),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("task queue is closed")]
pub struct QueueClosed;

impl TaskQueue {
    pub fn unbounded() -> (Self, TaskQueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self { sender: Sender::Unbounded(sender) },
            TaskQueueReceiver { receiver: Receiver::Unbounded(receiver) },
        )
    }

    /// Applies backpressure once `capacity` ids are in flight.
    pub fn bounded(capacity: usize) -> (Self, TaskQueueReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self { sender: Sender::Bounded(sender) },
            TaskQueueReceiver { receiver: Receiver::Bounded(receiver) },
        )
    }

    pub async fn enqueue(&self, task_id: TaskId) -> Result<(), QueueClosed> {
        match &self.sender {
            Sender::Unbounded(sender) => sender.send(task_id).map_err(|_| QueueClosed),
            Sender::Bounded(sender) => sender.send(task_id).await.map_err(|_| QueueClosed),
        }
    }
}

impl TaskQueueReceiver {
    /// `None` once all senders are dropped and the queue is drained.
    pub async fn recv(&mut self) -> Option<TaskId> {
        match &mut self.receiver {
            Receiver::Unbounded(receiver) => receiver.recv().await,
            Receiver::Bounded(receiver) => receiver.recv().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use taskrun_core::domain::task::TaskId;

    use super::{QueueClosed, TaskQueue};

    #[tokio::test]
    async fn ids_are_delivered_in_order() {
        let (queue, mut receiver) = TaskQueue::unbounded();
        queue.enqueue(TaskId("t-1".to_string())).await.expect("enqueue");
        queue.enqueue(TaskId("t-2".to_string())).await.expect("enqueue");

        assert_eq!(receiver.recv().await, Some(TaskId("t-1".to_string())));
        assert_eq!(receiver.recv().await, Some(TaskId("t-2".to_string())));
    }

    #[tokio::test]
    async fn enqueue_after_receiver_drop_reports_closed() {
        let (queue, receiver) = TaskQueue::unbounded();
        drop(receiver);
        let result = queue.enqueue(TaskId("t-1".to_string())).await;
        assert_eq!(result, Err(QueueClosed));
    }

    #[tokio::test]
    async fn bounded_queue_delivers_and_drains_to_none() {
        let (queue, mut receiver) = TaskQueue::bounded(2);
        queue.enqueue(TaskId("t-1".to_string())).await.expect("enqueue");
        drop(queue);

        assert_eq!(receiver.recv().await, Some(TaskId("t-1".to_string())));
        assert_eq!(receiver.recv().await, None);
    }
}
