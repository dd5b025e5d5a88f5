use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    running: usize,
    /// Waiters in arrival order; each one is woken with a slot already reserved for it.
    pending: VecDeque<oneshot::Sender<()>>,
}

/// Admits at most `max_concurrent` tasks at once, the rest wait in FIFO order.
#[derive(Debug, Clone)]
pub struct DownloadQueue {
    state: Arc<Mutex<QueueState>>,
    max_concurrent: usize,
}

impl DownloadQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Waits for a slot, then runs `task` to completion inside the caller's future.
    pub async fn add<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _slot = self.admit().await;
        task.await
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        QueueStatus {
            running: state.running,
            queued: state.pending.len(),
            max_concurrent: self.max_concurrent,
        }
    }

    async fn admit(&self) -> Slot {
        let waiter = {
            let mut state = self.lock();
            if state.running < self.max_concurrent && state.pending.is_empty() {
                state.running += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.pending.push_back(tx);
                log::info!(
                    "🚦 [QUEUE] Task queued ({} running, {} waiting)",
                    state.running,
                    state.pending.len()
                );
                Some(rx)
            }
        };

        if let Some(rx) = waiter {
            let mut pending = PendingAdmission {
                rx,
                state: self.state.clone(),
                admitted: false,
            };
            if (&mut pending.rx).await.is_err() {
                // Sender vanished without handing over a slot; take one directly.
                self.lock().running += 1;
            }
            pending.admitted = true;
        }

        Slot {
            state: self.state.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn release(state: &Mutex<QueueState>) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    while let Some(next) = state.pending.pop_front() {
        if next.send(()).is_ok() {
            // Slot transferred, running count unchanged.
            return;
        }
    }
    state.running = state.running.saturating_sub(1);
}

/// Running slot; dropping it admits the next waiter.
struct Slot {
    state: Arc<Mutex<QueueState>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        release(&self.state);
    }
}

/// A waiter that gave up before being admitted passes on any slot handed to it meanwhile.
struct PendingAdmission {
    rx: oneshot::Receiver<()>,
    state: Arc<Mutex<QueueState>>,
    admitted: bool,
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        if self.admitted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            release(&self.state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for(queue: &DownloadQueue, expected: impl Fn(QueueStatus) -> bool) {
        for _ in 0..1000 {
            if expected(queue.status()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("queue never reached expected state: {:?}", queue.status());
    }

    #[tokio::test]
    async fn bounds_running_tasks_and_admits_in_order() {
        let queue = DownloadQueue::new(2);
        let started = Arc::new(Mutex::new(Vec::new()));
        let mut releases = Vec::new();
        let mut handles = Vec::new();

        for id in 0..5usize {
            let (release_tx, release_rx) = oneshot::channel::<()>();
            releases.push(Some(release_tx));

            let queue_clone = queue.clone();
            let started = started.clone();
            handles.push(tokio::spawn(async move {
                queue_clone
                    .add(async move {
                        started.lock().unwrap().push(id);
                        let _ = release_rx.await;
                        id
                    })
                    .await
            }));

            wait_for(&queue, |s| s.running + s.queued == id + 1).await;
        }

        let status = queue.status();
        assert_eq!(status.running, 2);
        assert_eq!(status.queued, 3);
        assert_eq!(status.max_concurrent, 2);
        assert_eq!(*started.lock().unwrap(), vec![0, 1]);

        releases[0].take().unwrap().send(()).unwrap();
        wait_for(&queue, |s| s.queued == 2).await;
        assert_eq!(queue.status().running, 2);
        wait_for(&queue, |_| started.lock().unwrap().len() == 3).await;
        assert_eq!(*started.lock().unwrap(), vec![0, 1, 2]);

        for release in releases.iter_mut().skip(1) {
            release.take().unwrap().send(()).unwrap();
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
        assert_eq!(*started.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.status().running, 0);
        assert_eq!(queue.status().queued, 0);
    }

    #[tokio::test]
    async fn failing_task_frees_its_slot() {
        let queue = DownloadQueue::new(1);
        let result: std::result::Result<(), &str> = queue.add(async { Err("boom") }).await;
        assert!(result.is_err());
        assert_eq!(queue.add(async { 7 }).await, 7);
        assert_eq!(queue.status().running, 0);
    }

    #[tokio::test]
    async fn abandoned_waiter_is_skipped() {
        let queue = DownloadQueue::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.add(async move {
                    let _ = release_rx.await;
                })
                .await
            })
        };
        wait_for(&queue, |s| s.running == 1).await;

        let abandoned = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.add(async {}).await })
        };
        wait_for(&queue, |s| s.queued == 1).await;
        abandoned.abort();
        let _ = abandoned.await;

        release_tx.send(()).unwrap();
        holder.await.unwrap();

        assert_eq!(queue.status().running, 0);
        assert_eq!(queue.status().queued, 0);
        assert_eq!(queue.add(async { "next" }).await, "next");
    }
}
