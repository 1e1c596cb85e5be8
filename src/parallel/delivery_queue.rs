use crate::error::{ExportError, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Represents the operational state of the delivery queue
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeliveryQueueState {
    /// Producers may push and the consumer receives in push order
    Open,
    /// No more records will be pushed; remaining records can be drained
    Closed,
    /// A producer failed; pending records are discarded
    Failed,
}

#[derive(Debug)]
struct DeliveryQueueInner<T> {
    queue: VecDeque<T>,
    state: DeliveryQueueState,
    /// First failure reported by a producer, handed to the consumer once
    failure: Option<ExportError>,
    /// Number of queued records after which pushes block, `None` for unbounded
    capacity: Option<usize>,
}

/// A thread-safe many-producer, single-consumer delivery channel.
///
/// Producers push records as soon as they are decoded. The consumer reads them
/// in push order, so records pushed by one producer are never reordered.
/// Closing the queue lets the consumer drain what is left and then observe the
/// end of the stream. Failing the queue makes the consumer see the failure on
/// its next read, ahead of any record still queued.
#[derive(Debug)]
pub struct DeliveryQueue<T> {
    inner: Mutex<DeliveryQueueInner<T>>,
    signal: Condvar,
}

#[inline]
fn queue_closed_err(msg: &str) -> ExportError {
    ExportError::QueueClosed(msg.to_string())
}

impl<T> DeliveryQueue<T> {
    #[inline]
    fn acquire_lock(&self) -> Result<MutexGuard<'_, DeliveryQueueInner<T>>> {
        self.inner
            .lock()
            .map_err(|e| ExportError::Other(e.to_string()))
    }

    #[inline]
    fn await_signal<'a>(
        &'a self,
        inner: MutexGuard<'a, DeliveryQueueInner<T>>,
    ) -> Result<MutexGuard<'a, DeliveryQueueInner<T>>> {
        self.signal
            .wait(inner)
            .map_err(|e| ExportError::Other(e.to_string()))
    }

    #[inline]
    fn check_open(inner: &DeliveryQueueInner<T>, msg: &str) -> Result<()> {
        if inner.state == DeliveryQueueState::Open {
            Ok(())
        } else {
            Err(queue_closed_err(msg))
        }
    }

    /// Create an unbounded queue.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue; with `Some(n)`, pushes block while `n` records are queued.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(DeliveryQueueInner {
                queue: VecDeque::new(),
                state: DeliveryQueueState::Open,
                failure: None,
                capacity: capacity.map(|c| c.max(1)),
            }),
            signal: Condvar::new(),
        }
    }

    /// Add a record to the back of the queue.
    ///
    /// Blocks while a bounded queue is full. Fails with `QueueClosed` once the
    /// queue is closed or failed, including while waiting for space.
    pub fn push_back(&self, item: T) -> Result<()> {
        let mut inner = self.acquire_lock()?;
        Self::check_open(&inner, "Cannot push to a closed queue")?;

        while let Some(capacity) = inner.capacity {
            if inner.queue.len() < capacity {
                break;
            }
            inner = self.await_signal(inner)?;
            Self::check_open(&inner, "Queue was closed while waiting for space")?;
        }

        inner.queue.push_back(item);
        self.signal.notify_all();
        Ok(())
    }

    /// Read the next record.
    ///
    /// Blocks until a record is available, the queue is closed, or it failed.
    ///
    /// # Returns
    /// - Ok(Some(record)) for the next record
    /// - Ok(None) once the queue is closed and drained
    /// - Err(failure) the first time after a producer failed the queue
    pub fn read_front(&self) -> Result<Option<T>> {
        let mut inner = self.acquire_lock()?;

        loop {
            if inner.state == DeliveryQueueState::Failed {
                return match inner.failure.take() {
                    Some(failure) => Err(failure),
                    None => Err(queue_closed_err("Queue failed and its error was already taken")),
                };
            }

            if let Some(item) = inner.queue.pop_front() {
                self.signal.notify_all();
                return Ok(Some(item));
            }

            if inner.state == DeliveryQueueState::Closed {
                return Ok(None);
            }

            inner = self.await_signal(inner)?;
        }
    }

    /// Read the next record without blocking.
    pub fn try_read_front(&self) -> Result<Option<T>> {
        let mut inner = self.acquire_lock()?;

        if inner.state == DeliveryQueueState::Failed {
            return match inner.failure.take() {
                Some(failure) => Err(failure),
                None => Err(queue_closed_err("Queue failed and its error was already taken")),
            };
        }

        let item = inner.queue.pop_front();
        if item.is_some() {
            self.signal.notify_all();
        }
        Ok(item)
    }

    /// Close the queue.
    ///
    /// Records already queued can still be read. Closing a failed queue has no effect.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.acquire_lock()?;
        if inner.state == DeliveryQueueState::Open {
            inner.state = DeliveryQueueState::Closed;
        }
        self.signal.notify_all();
        Ok(())
    }

    /// Fail the queue with `error`.
    ///
    /// Only the first failure is kept; later ones are dropped. Pending records
    /// are discarded and blocked producers are woken.
    ///
    /// # Returns
    /// Ok(true) if this call recorded the failure
    pub fn fail(&self, error: ExportError) -> Result<bool> {
        let mut inner = self.acquire_lock()?;
        if inner.state == DeliveryQueueState::Failed {
            return Ok(false);
        }
        inner.state = DeliveryQueueState::Failed;
        inner.failure = Some(error);
        inner.queue.clear();
        self.signal.notify_all();
        Ok(true)
    }

    pub fn state(&self) -> Result<DeliveryQueueState> {
        Ok(self.acquire_lock()?.state)
    }

    /// Number of records waiting to be read
    pub fn len(&self) -> Result<usize> {
        Ok(self.acquire_lock()?.queue.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.acquire_lock()?.queue.is_empty())
    }

    /// Check if the queue is done (closed and drained)
    pub fn is_done(&self) -> Result<bool> {
        let inner = self.acquire_lock()?;
        Ok(inner.queue.is_empty() && inner.state == DeliveryQueueState::Closed)
    }
}
