//! Buffer set shared between a driver and its state machines.

/// Largest per-buffer capacity kept by [`BufferSet::trim`].
///
/// A single oversized DataRow or COPY frame can balloon the read buffer
/// far beyond what ordinary traffic needs; an idle pooled connection
/// should not pin that memory.
pub const RETAINED_BUFFER_CAPACITY: usize = 64 * 1024;

/// Buffers for one connection's protocol exchange.
///
/// The driver fills `type_byte` and `read_buffer` with each incoming
/// message and writes `write_buffer` out when a state machine asks for
/// it. `column_buffer` keeps the current RowDescription payload alive
/// across DataRow messages.
pub struct BufferSet {
    /// Type byte of the last message read
    pub type_byte: u8,
    /// Payload of the last message read (after the length field)
    pub read_buffer: Vec<u8>,
    /// Pending outgoing bytes
    pub write_buffer: Vec<u8>,
    /// Current result's RowDescription payload
    pub column_buffer: Vec<u8>,
}

impl BufferSet {
    /// Create a new buffer set.
    pub fn new() -> Self {
        Self {
            type_byte: 0,
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            column_buffer: Vec::new(),
        }
    }

    /// Clear all buffers, keeping their capacity.
    pub fn reset(&mut self) {
        self.type_byte = 0;
        self.read_buffer.clear();
        self.write_buffer.clear();
        self.column_buffer.clear();
    }

    /// Clear all buffers and release capacity beyond
    /// [`RETAINED_BUFFER_CAPACITY`].
    ///
    /// Called when a connection is parked idle in the pool, so one
    /// large result or COPY stream does not keep its footprint for the
    /// connection's whole lifetime.
    pub fn trim(&mut self) {
        self.reset();
        for buf in [
            &mut self.read_buffer,
            &mut self.write_buffer,
            &mut self.column_buffer,
        ] {
            if buf.capacity() > RETAINED_BUFFER_CAPACITY {
                buf.shrink_to(RETAINED_BUFFER_CAPACITY);
            }
        }
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferSet")
            .field("type_byte", &self.type_byte)
            .field("read_len", &self.read_buffer.len())
            .field("write_len", &self.write_buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_capacity() {
        let mut set = BufferSet::new();
        set.read_buffer.extend_from_slice(&[1; 4096]);
        set.type_byte = b'Z';
        let capacity = set.read_buffer.capacity();

        set.reset();
        assert!(set.read_buffer.is_empty());
        assert_eq!(set.type_byte, 0);
        assert_eq!(set.read_buffer.capacity(), capacity);
    }

    #[test]
    fn trim_releases_oversized_buffers() {
        let mut set = BufferSet::new();
        set.read_buffer.resize(4 * RETAINED_BUFFER_CAPACITY, 0);
        set.write_buffer.extend_from_slice(b"pending");

        set.trim();
        assert!(set.read_buffer.is_empty());
        assert!(set.write_buffer.is_empty());
        assert!(set.read_buffer.capacity() <= RETAINED_BUFFER_CAPACITY);
        // Small buffers keep their capacity
        assert!(set.write_buffer.capacity() > 0);
    }
}
