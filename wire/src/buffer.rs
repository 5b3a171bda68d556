//! Growable receive/send buffer with a read-offset window.
//!
//! A [`Buffer`] owns contiguous storage and exposes the valid data as the
//! window `[offset, offset + len)`. New bytes are appended at the tail and
//! consumed from the head, so a partially parsed frame can stay in place
//! across reads without copying.

/// Largest payload a session will accept or emit (4 MiB).
pub const MAX_PACK_SIZE: usize = 4 * 1024 * 1024;
/// Storage allocated up front for a fresh buffer (32 KiB).
pub const INITIAL_SIZE: usize = 32 * 1024;
/// Growth increment, and the offset threshold past which the buffer
/// compacts instead of growing (32 KiB).
pub const PER_ALLOC_SIZE: usize = 32 * 1024;

/// Growable byte container with append-at-tail, consume-at-head semantics.
///
/// Invariant: `offset + len <= storage.len()`.
#[derive(Debug)]
pub struct Buffer {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
}

impl Buffer {
    /// Create an empty buffer with [`INITIAL_SIZE`] capacity.
    pub fn new() -> Self {
        Self {
            storage: vec![0u8; INITIAL_SIZE],
            offset: 0,
            len: 0,
        }
    }

    /// Create a buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut storage = vec![0u8; INITIAL_SIZE.max(data.len())];
        storage[..data.len()].copy_from_slice(data);
        Self {
            storage,
            offset: 0,
            len: data.len(),
        }
    }

    /// The valid data window.
    pub fn data(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }

    /// Number of valid bytes in the window.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current storage capacity.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Reset the window without releasing capacity.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.len = 0;
    }

    /// Writable tail region, guaranteed non-empty.
    ///
    /// When the tail is exhausted the buffer either compacts (once the
    /// offset has passed one [`PER_ALLOC_SIZE`] increment, so a lagging
    /// head cannot force unbounded growth) or grows by [`PER_ALLOC_SIZE`].
    pub fn writable(&mut self) -> &mut [u8] {
        if self.storage.len() <= self.offset + self.len {
            if self.offset >= PER_ALLOC_SIZE {
                self.compact();
            } else {
                let new_len = self.storage.len() + PER_ALLOC_SIZE;
                self.storage.resize(new_len, 0);
            }
        }
        let start = self.offset + self.len;
        &mut self.storage[start..]
    }

    /// Writable tail region of at least `n` bytes.
    ///
    /// Compacts first when the offset has passed one [`PER_ALLOC_SIZE`]
    /// increment, then grows in increments until the tail fits `n`.
    pub fn reserve(&mut self, n: usize) -> &mut [u8] {
        let tail = self.storage.len() - (self.offset + self.len);
        if tail < n && self.offset >= PER_ALLOC_SIZE {
            self.compact();
        }
        while self.storage.len() - self.offset - self.len < n {
            let new_len = self.storage.len() + PER_ALLOC_SIZE;
            self.storage.resize(new_len, 0);
        }
        let start = self.offset + self.len;
        &mut self.storage[start..]
    }

    /// Mark `n` bytes written into [`Buffer::writable`] as valid.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.offset + self.len + n <= self.storage.len());
        self.len += n;
    }

    /// Drop `n` bytes from the head of the window.
    ///
    /// The caller guarantees `n <= len()`.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len, "consume past end of buffer window");
        self.offset += n;
        self.len -= n;
    }

    /// Shift the window to the start of storage, reclaiming consumed space.
    pub fn compact(&mut self) {
        if self.offset > 0 {
            self.storage.copy_within(self.offset..self.offset + self.len, 0);
            self.offset = 0;
        }
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}
