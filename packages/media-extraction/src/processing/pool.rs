//! Fixed-size worker pool for CPU-bound image work.
//!
//! Workers are plain OS threads pulling jobs off an MPMC channel. The async
//! side only ever does a message round trip (bytes in, `ProcessedImage`
//! out), so the I/O scheduler never blocks on hashing or re-encoding.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{PoolError, ProcessingError};
use crate::processing::standardize::{process_image, ProcessedImage, StandardizeOptions};

struct Job {
    bytes: Vec<u8>,
    reply: oneshot::Sender<Result<ProcessedImage, ProcessingError>>,
}

/// Long-lived image processing service with an explicit start/stop lifecycle.
pub struct ImageProcessingPool {
    sender: Mutex<Option<async_channel::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl ImageProcessingPool {
    /// One fewer than the available cores, at least one.
    pub fn default_worker_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }

    /// Spawn `workers` threads.
    pub fn start(workers: usize, options: StandardizeOptions) -> Result<Self, PoolError> {
        let workers = workers.max(1);
        let (tx, rx) = async_channel::bounded::<Job>(workers * 4);

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let rx = rx.clone();
            let options = options.clone();
            let handle = std::thread::Builder::new()
                .name(format!("image-worker-{i}"))
                .spawn(move || worker_loop(rx, options))
                .map_err(PoolError::Spawn)?;
            handles.push(handle);
        }

        info!(workers, max_dimension = options.max_dimension, "Image processing pool started");

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            size: workers,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_running(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Hash and standardize `bytes` on a worker thread.
    pub async fn process(&self, bytes: Vec<u8>) -> Result<ProcessedImage, PoolError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PoolError::Stopped)?;

        let (reply, response) = oneshot::channel();
        sender
            .send(Job { bytes, reply })
            .await
            .map_err(|_| PoolError::Stopped)?;

        Ok(response.await.map_err(|_| PoolError::WorkerDropped)??)
    }

    /// Stop accepting work, drain queued jobs, and join the workers.
    pub async fn stop(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(sender) = sender else {
            return;
        };
        sender.close();

        let handles: Vec<_> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let joined = tokio::task::spawn_blocking(move || {
            handles
                .into_iter()
                .map(JoinHandle::join)
                .filter(Result::is_err)
                .count()
        })
        .await;

        match joined {
            Ok(0) => info!("Image processing pool stopped"),
            Ok(panicked) => warn!(panicked, "Image processing pool stopped with panicked workers"),
            Err(e) => warn!(error = %e, "Failed to join image workers"),
        }
    }
}

impl Drop for ImageProcessingPool {
    fn drop(&mut self) {
        // Closing the channel lets detached workers exit on their own.
        if let Some(sender) = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sender.close();
        }
    }
}

fn worker_loop(rx: async_channel::Receiver<Job>, options: StandardizeOptions) {
    while let Ok(job) = rx.recv_blocking() {
        let size = job.bytes.len();
        let result = panic::catch_unwind(AssertUnwindSafe(|| process_image(&job.bytes, &options)))
            .unwrap_or(Err(ProcessingError::WorkerPanic));
        if let Err(e) = &result {
            debug!(size, error = %e, "Image rejected by worker");
        }
        // The caller may have given up; nothing to do then.
        let _ = job.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_image_bytes;

    #[tokio::test]
    async fn test_process_round_trip() {
        let pool = ImageProcessingPool::start(2, StandardizeOptions::default()).unwrap();
        let processed = pool.process(sample_image_bytes(7, 320, 240)).await.unwrap();
        assert_eq!((processed.width, processed.height), (320, 240));
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_many_concurrent_jobs() {
        let pool = ImageProcessingPool::start(2, StandardizeOptions::default()).unwrap();
        let jobs: Vec<_> = (0..12)
            .map(|seed| pool.process(sample_image_bytes(seed, 150, 150)))
            .collect();
        let results = futures::future::join_all(jobs).await;
        assert!(results.iter().all(|r| r.is_ok()));
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_processing_errors_are_returned() {
        let pool = ImageProcessingPool::start(1, StandardizeOptions::default()).unwrap();
        let err = pool.process(b"garbage".to_vec()).await.unwrap_err();
        assert!(matches!(err, PoolError::Processing(ProcessingError::Decode(_))));
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_process_after_stop_fails() {
        let pool = ImageProcessingPool::start(1, StandardizeOptions::default()).unwrap();
        pool.stop().await;
        assert!(!pool.is_running());
        let err = pool.process(sample_image_bytes(1, 150, 150)).await.unwrap_err();
        assert!(matches!(err, PoolError::Stopped));
        // Stopping twice is harmless
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_joins_every_worker() {
        let pool = ImageProcessingPool::start(3, StandardizeOptions::default()).unwrap();
        pool.process(sample_image_bytes(2, 150, 150)).await.unwrap();
        assert_eq!(pool.workers.lock().unwrap().len(), 3);

        pool.stop().await;
        assert!(pool.workers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_default_worker_count_positive() {
        assert!(ImageProcessingPool::default_worker_count() >= 1);
    }
}
