//! A bounded, per-channel batch buffer with swap-then-write flush
//! discipline: the in-memory buffer is swapped out (so new appends are
//! never lost to a slow writer call) before the writer is invoked.

use parking_lot::Mutex;
use std::future::Future;

use crate::error::WriteError;

pub struct Batcher<T> {
    buffer: Mutex<Vec<T>>,
    max_size: usize,
}

impl<T> Batcher<T> {
    pub fn new(max_size: usize) -> Self {
        Batcher { buffer: Mutex::new(Vec::with_capacity(max_size)), max_size }
    }

    /// Appends one record. Returns the swapped-out buffer when the size
    /// threshold is crossed — the caller is responsible for writing it
    /// through to storage. Returning an owned `Vec` (rather than writing
    /// inline) keeps the writer call out of the lock's critical section.
    pub fn append(&self, record: T) -> Option<Vec<T>> {
        let mut guard = self.buffer.lock();
        guard.push(record);
        if guard.len() >= self.max_size {
            Some(std::mem::take(&mut *guard))
        } else {
            None
        }
    }

    /// Unconditionally swaps out the buffer, `None` if it was empty.
    pub fn take(&self) -> Option<Vec<T>> {
        let mut guard = self.buffer.lock();
        if guard.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *guard))
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs `append`, then writes the returned batch (if any) through `write`.
/// A write failure does not roll back the append — the record already
/// left the buffer.
pub async fn append_and_maybe_write<T, F, Fut>(
    batcher: &Batcher<T>,
    record: T,
    write: F,
) -> Result<(), WriteError>
where
    F: FnOnce(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), WriteError>>,
{
    match batcher.append(record) {
        Some(batch) => write(batch).await,
        None => Ok(()),
    }
}

/// Unconditionally flushes the batcher through `write`. No-op if empty.
pub async fn flush<T, F, Fut>(batcher: &Batcher<T>, write: F) -> Result<(), WriteError>
where
    F: FnOnce(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), WriteError>>,
{
    match batcher.take() {
        Some(batch) => write(batch).await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_below_threshold_does_not_flush() {
        let b: Batcher<i32> = Batcher::new(3);
        assert!(b.append(1).is_none());
        assert!(b.append(2).is_none());
        assert_eq!(b.len(), 2);
    }

    #[tokio::test]
    async fn append_at_threshold_swaps_buffer() {
        let b: Batcher<i32> = Batcher::new(2);
        assert!(b.append(1).is_none());
        let swapped = b.append(2);
        assert_eq!(swapped, Some(vec![1, 2]));
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn flush_on_empty_is_noop() {
        let b: Batcher<i32> = Batcher::new(10);
        let mut called = false;
        flush(&b, |_batch| {
            called = true;
            async { Ok(()) }
        })
        .await
        .unwrap();
        assert!(!called);
    }

    #[tokio::test]
    async fn flush_drains_partial_buffer() {
        let b: Batcher<i32> = Batcher::new(10);
        b.append(1);
        b.append(2);
        let mut seen = Vec::new();
        flush(&b, |batch| {
            seen = batch;
            async { Ok(()) }
        })
        .await
        .unwrap();
        assert_eq!(seen, vec![1, 2]);
        assert!(b.is_empty());
    }
}
