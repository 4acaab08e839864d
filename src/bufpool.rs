use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Buffers above this size are never kept once returned.
pub const MAX_POOLED_BUFFER: usize = 1024 * 1024;

/// Idle buffers kept per size class.
const MAX_IDLE_PER_CLASS: usize = 32;

/// A pool of read buffers keyed by exact size.
///
/// Buffers are handed out wrapped in a [`PooledBuffer`] guard which puts
/// them back on drop, so every exit path of the borrower returns its buffer.
/// Buffers larger than [`MAX_POOLED_BUFFER`] are simply freed, which bounds
/// the memory the pool can hold.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide pool shared by the hashers.
    pub fn global() -> &'static BufferPool {
        static POOL: OnceLock<BufferPool> = OnceLock::new();
        POOL.get_or_init(BufferPool::new)
    }

    /// Borrow a buffer of exactly `size` bytes.
    pub fn get(&self, size: usize) -> PooledBuffer<'_> {
        let reused = {
            let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
            free.get_mut(&size).and_then(Vec::pop)
        };
        PooledBuffer { buf: Some(reused.unwrap_or_else(|| vec![0u8; size])), pool: self }
    }

    fn put(&self, buf: Vec<u8>) {
        let size = buf.len();
        if size > MAX_POOLED_BUFFER {
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        let class = free.entry(size).or_default();
        if class.len() < MAX_IDLE_PER_CLASS {
            class.push(buf);
        }
    }

    /// Number of idle buffers of `size` bytes.
    pub fn idle(&self, size: usize) -> usize {
        let free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        free.get(&size).map(Vec::len).unwrap_or(0)
    }
}

/// A borrowed buffer; returns itself to the pool when dropped.
pub struct PooledBuffer<'a> {
    buf: Option<Vec<u8>>,
    pool: &'a BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_reused() {
        let pool = BufferPool::new();
        {
            let mut b = pool.get(4096);
            b[0] = 7;
            assert_eq!(b.len(), 4096);
        }
        assert_eq!(pool.idle(4096), 1);
        let b = pool.get(4096);
        assert_eq!(b.len(), 4096);
        assert_eq!(pool.idle(4096), 0);
    }

    #[test]
    fn large_buffers_are_not_kept() {
        let pool = BufferPool::new();
        drop(pool.get(2 * MAX_POOLED_BUFFER));
        assert_eq!(pool.idle(2 * MAX_POOLED_BUFFER), 0);
        drop(pool.get(MAX_POOLED_BUFFER));
        assert_eq!(pool.idle(MAX_POOLED_BUFFER), 1);
    }

    #[test]
    fn returned_on_early_exit() {
        let pool = BufferPool::new();
        let r: Result<(), ()> = (|| {
            let _b = pool.get(128);
            Err(())
        })();
        assert!(r.is_err());
        assert_eq!(pool.idle(128), 1);
    }
}
