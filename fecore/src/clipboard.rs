/*!
Hand-off queue between the acquisition thread and the consumer.

Built on a `crossbeam_channel`. The producer side holds the only long-lived
sender; [`ClipBoard::finish`] drops it, which wakes every blocked consumer
once the queue has drained.
*/

use std::sync::{Mutex, MutexGuard};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};

use crate::error::{FeError, Result};

#[derive(Debug)]
pub struct ClipBoard<T> {
    tx: Mutex<Option<Sender<T>>>,
    rx: Receiver<T>,
}

impl<T> ClipBoard<T> {
    /// Queue holding at most `capacity` records; `push` blocks when full
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx: Mutex::new(Some(tx)), rx }
    }

    pub fn unbounded() -> Self {
        let (tx, rx) = unbounded();
        Self { tx: Mutex::new(Some(tx)), rx }
    }

    fn sender(&self) -> MutexGuard<'_, Option<Sender<T>>> {
        self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a record. Fails once the clipboard is finished.
    pub fn push(&self, item: T) -> Result<()> {
        let tx = self.sender().clone().ok_or(FeError::ClipboardFinished)?;
        tx.send(item).map_err(|_| FeError::ClipboardFinished)
    }

    /// Oldest record, blocking while the queue is empty. `None` means the
    /// producer finished and everything has been consumed.
    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Non-blocking variant of [`pop`](Self::pop)
    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn size(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Mark the end of the stream. Further calls have no effect.
    pub fn finish(&self) {
        self.sender().take();
    }

    pub fn is_finished(&self) -> bool {
        self.sender().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawData;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_pop_blocks_until_push() {
        let clipboard = Arc::new(ClipBoard::bounded(4));
        let consumer = {
            let clipboard = Arc::clone(&clipboard);
            thread::spawn(move || clipboard.pop())
        };
        thread::sleep(Duration::from_millis(50));
        let record = RawData::new(0x80, vec![1, 2, 3], 3);
        clipboard.push(record.clone()).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(record));
    }

    #[test]
    fn test_fifo_order_across_threads() {
        const N: u32 = 500;
        let clipboard = Arc::new(ClipBoard::bounded(8));
        let producer = {
            let clipboard = Arc::clone(&clipboard);
            thread::spawn(move || {
                for i in 0..N {
                    clipboard.push(RawData::new(i, vec![i], 1)).unwrap();
                }
                clipboard.finish();
            })
        };
        let mut seen = Vec::new();
        while let Some(record) = clipboard.pop() {
            seen.push(record.start_address);
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..N).collect::<Vec<_>>());
    }

    #[test]
    fn test_finish_unblocks_waiting_consumers() {
        let clipboard: Arc<ClipBoard<RawData>> = Arc::new(ClipBoard::unbounded());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let clipboard = Arc::clone(&clipboard);
                thread::spawn(move || clipboard.pop())
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        clipboard.finish();
        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn test_push_after_finish_is_rejected() {
        let clipboard = ClipBoard::unbounded();
        clipboard.push(1u32).unwrap();
        clipboard.finish();
        assert!(clipboard.is_finished());
        assert!(matches!(clipboard.push(2), Err(FeError::ClipboardFinished)));
        // records pushed before finishing are still delivered
        assert_eq!(clipboard.size(), 1);
        assert_eq!(clipboard.pop(), Some(1));
        assert_eq!(clipboard.pop(), None);
        assert!(clipboard.is_empty());
    }
}
