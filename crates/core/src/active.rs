//! The per-service outbound queue.
//!
//! A channel acts as the queue structure: follow-up messages a service
//! emits while holding no locks are passed one by one to a single consumer
//! task, which serialises outbound work for that service. Callers get a
//! future that resolves once the routing layer accepted the message; they
//! may also just drop it, making the send fire-and-forget. Cancellation
//! drops the callback, never the committed storage mutation that preceded
//! the send.

use tokio::sync::{mpsc, oneshot};
use vault2_api::{
    BoxFut, Destination, DynRoutingSender, MessageWrapper, VaultError,
    VaultResult,
};

struct Job {
    destination: Destination,
    wrapper: MessageWrapper,
    done: oneshot::Sender<VaultResult<()>>,
}

/// A single-consumer task queue serialising one service's outbound sends.
#[derive(Debug)]
pub struct ActiveQueue {
    tx: mpsc::UnboundedSender<Job>,
    task: tokio::task::JoinHandle<()>,
}

impl ActiveQueue {
    /// Spawn the consumer task. Must be called within a tokio runtime.
    pub fn new(name: &'static str, sender: DynRoutingSender) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result =
                    sender.send(job.destination, job.wrapper).await;
                if let Err(ref error) = result {
                    tracing::warn!(queue = name, ?error, "outbound send failed");
                }
                if job.done.send(result).is_err() {
                    tracing::trace!(
                        queue = name,
                        "outbound result dropped by caller",
                    );
                }
            }
        });
        Self { tx, task }
    }

    /// Enqueue an outbound message; the future resolves when the routing
    /// layer has accepted it.
    pub fn enqueue(
        &self,
        destination: Destination,
        wrapper: MessageWrapper,
    ) -> BoxFut<'static, VaultResult<()>> {
        let (done, done_rx) = oneshot::channel();
        let job = Job {
            destination,
            wrapper,
            done,
        };
        if self.tx.send(job).is_err() {
            return Box::pin(async {
                Err(VaultError::failed("outbound queue closed"))
            });
        }
        Box::pin(async move {
            done_rx
                .await
                .unwrap_or_else(|_| Err(VaultError::failed("outbound queue dropped")))
        })
    }
}

impl Drop for ActiveQueue {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vault2_api::{GroupName, Id, Persona, ID_LEN};
    use vault2_test_utils::CaptureSender;

    fn wrapper(message_id: u64) -> MessageWrapper {
        MessageWrapper {
            message_id,
            persona: Persona::DataManager,
            action_tag: 0,
            payload: bytes::Bytes::new(),
        }
    }

    fn group(fill: u8) -> GroupName {
        GroupName::from(Id(bytes::Bytes::from(vec![fill; ID_LEN])))
    }

    #[tokio::test]
    async fn sends_resolve_in_order() {
        let capture = CaptureSender::new();
        let queue = ActiveQueue::new("test", capture.clone());
        for message_id in 0..4u64 {
            queue
                .enqueue(
                    Destination::Group(group(1)),
                    wrapper(message_id),
                )
                .await
                .unwrap();
        }
        let sent = capture.sent();
        assert_eq!(4, sent.len());
        let ids: Vec<u64> =
            sent.iter().map(|(_, w)| w.message_id).collect();
        assert_eq!(vec![0, 1, 2, 3], ids);
    }

    #[tokio::test]
    async fn dropped_future_still_sends() {
        let capture = CaptureSender::new();
        let queue = ActiveQueue::new("test", capture.clone());
        drop(queue.enqueue(Destination::Group(group(1)), wrapper(9)));
        // give the consumer task a chance to drain
        for _ in 0..50 {
            if !capture.sent().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert_eq!(1, capture.sent().len());
    }
}
