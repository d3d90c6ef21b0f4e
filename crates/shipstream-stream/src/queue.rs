//! Single-worker completion queue.
//!
//! Jobs run one at a time in submission order. `clear` drops every job not
//! yet started; `pause` holds the worker before the next job until `start`.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::debug;

struct Job {
    generation: u64,
    task: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct Counters {
    /// Bumped by `clear`; jobs from older generations are skipped.
    generation: u64,
    pending: usize,
}

pub struct BlockQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    counters: Arc<Mutex<Counters>>,
    paused: watch::Sender<bool>,
}

impl BlockQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            counters: Arc::new(Mutex::new(Counters::default())),
            paused: watch::Sender::new(false),
        }
    }

    pub fn push(&self, task: BoxFuture<'static, ()>) {
        let generation = {
            let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            counters.pending += 1;
            counters.generation
        };
        if self.tx.send(Job { generation, task }).is_err() {
            debug!("block queue worker gone, job dropped");
        }
    }

    /// Jobs waiting to run (the running one excluded).
    pub fn size(&self) -> usize {
        self.counters.lock().unwrap_or_else(|e| e.into_inner()).pending
    }

    pub fn clear(&self) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.generation += 1;
        counters.pending = 0;
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Resume the queue, spawning the worker on first use.
    pub fn start(&self) {
        self.paused.send_replace(false);
        let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(rx) = rx {
            tokio::spawn(run_worker(rx, self.counters.clone(), self.paused.subscribe()));
        }
    }
}

impl Default for BlockQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Job>,
    counters: Arc<Mutex<Counters>>,
    mut paused: watch::Receiver<bool>,
) {
    while let Some(job) = rx.recv().await {
        if paused.wait_for(|p| !*p).await.is_err() {
            break;
        }
        {
            let mut counters = counters.lock().unwrap_or_else(|e| e.into_inner());
            if job.generation != counters.generation {
                continue;
            }
            counters.pending -= 1;
        }
        job.task.await;
    }
    debug!("block queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> BoxFuture<'static, ()>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let job = move |n: u32| {
            let sink = sink.clone();
            async move { sink.lock().unwrap().push(n) }.boxed()
        };
        (seen, job)
    }

    #[tokio::test]
    async fn runs_jobs_in_submission_order() {
        let queue = BlockQueue::new();
        queue.start();
        let (seen, job) = recorder();

        // the first job finishes last if run concurrently
        let sink = seen.clone();
        queue.push(
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                sink.lock().unwrap().push(0);
            }
            .boxed(),
        );
        for n in 1..=3 {
            queue.push(job(n));
        }

        let (done_tx, done_rx) = oneshot::channel();
        queue.push(async move { let _ = done_tx.send(()); }.boxed());
        done_rx.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn pause_holds_and_clear_drops_waiting_jobs() {
        let queue = BlockQueue::new();
        queue.pause();
        queue.start();
        queue.pause();
        let (seen, job) = recorder();

        queue.push(job(1));
        queue.push(job(2));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(queue.size(), 2);

        queue.clear();
        assert_eq!(queue.size(), 0);
        queue.push(job(3));
        queue.start();

        let (done_tx, done_rx) = oneshot::channel();
        queue.push(async move { let _ = done_tx.send(()); }.boxed());
        done_rx.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }
}
