use std::{error::Error, fmt::Display};

/// Returned when a write does not fit into the remaining space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Overflow {
    pub free: usize,
    pub incoming: usize,
}

impl Display for Overflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Insufficient space: {} bytes free, {} bytes incoming",
            self.free, self.incoming
        )
    }
}

impl Error for Overflow {}

/// Fixed-capacity byte ring with wrapping read and write cursors.
///
/// Both cursors stay in `[0, capacity)` and `len()` stays in `[0, capacity]`.
/// Reads and writes touch at most two contiguous segments: one up to the
/// physical end of the storage and one wrapping around to its start.
#[derive(Debug)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    read_pointer: usize,
    write_pointer: usize,
    stored: usize,
}

impl RingBuffer {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> RingBuffer {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        RingBuffer {
            storage: vec![0; capacity].into_boxed_slice(),
            read_pointer: 0,
            write_pointer: 0,
            stored: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of bytes stored
    pub fn len(&self) -> usize {
        self.stored
    }

    pub fn is_empty(&self) -> bool {
        self.stored == 0
    }

    /// Number of bytes that can still be written
    pub fn free(&self) -> usize {
        self.capacity() - self.stored
    }

    pub fn read_pointer(&self) -> usize {
        self.read_pointer
    }

    pub fn write_pointer(&self) -> usize {
        self.write_pointer
    }

    /// Discard all content and move both cursors back to the start.
    pub fn reset(&mut self) {
        self.read_pointer = 0;
        self.write_pointer = 0;
        self.stored = 0;
    }

    /// Write `len` bytes produced by `fill`.
    ///
    /// `fill` is called once per contiguous segment with the destination
    /// slice and the offset of that segment within the written data. Nothing
    /// is written if `len` exceeds [`RingBuffer::free`].
    pub fn write_with(
        &mut self,
        len: usize,
        mut fill: impl FnMut(&mut [u8], usize),
    ) -> Result<(), Overflow> {
        if len > self.free() {
            return Err(Overflow {
                free: self.free(),
                incoming: len,
            });
        }
        if len == 0 {
            return Ok(());
        }
        let capacity = self.capacity();
        let first = (capacity - self.write_pointer).min(len);
        let second = len - first;

        fill(
            &mut self.storage[self.write_pointer..self.write_pointer + first],
            0,
        );
        self.write_pointer = (self.write_pointer + first) % capacity;
        self.stored += first;

        if second > 0 {
            fill(&mut self.storage[..second], first);
            self.write_pointer += second;
            self.stored += second;
        }
        self.check();
        Ok(())
    }

    /// Write a slice.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Overflow> {
        self.write_with(data.len(), |segment, offset| {
            segment.copy_from_slice(&data[offset..offset + segment.len()]);
        })
    }

    /// Move up to `dest.len()` bytes into `dest`.
    ///
    /// `consumed` is called after each contiguous segment with the number of
    /// bytes that segment moved out. Returns the total number of bytes moved.
    pub fn read_with(&mut self, dest: &mut [u8], mut consumed: impl FnMut(usize)) -> usize {
        let transfer = self.stored.min(dest.len());
        if transfer == 0 {
            return 0;
        }
        let capacity = self.capacity();
        let first = (capacity - self.read_pointer).min(transfer);
        let second = transfer - first;

        dest[..first]
            .copy_from_slice(&self.storage[self.read_pointer..self.read_pointer + first]);
        self.read_pointer = (self.read_pointer + first) % capacity;
        self.stored -= first;
        consumed(first);

        if second > 0 {
            dest[first..transfer].copy_from_slice(&self.storage[..second]);
            self.read_pointer += second;
            self.stored -= second;
            consumed(second);
        }
        self.check();
        transfer
    }

    /// Move up to `dest.len()` bytes into `dest`.
    pub fn read(&mut self, dest: &mut [u8]) -> usize {
        self.read_with(dest, |_| ())
    }

    fn check(&self) {
        debug_assert!(self.stored <= self.capacity());
        debug_assert!(self.read_pointer < self.capacity());
        debug_assert!(self.write_pointer < self.capacity());
        debug_assert_eq!(
            (self.read_pointer + self.stored) % self.capacity(),
            self.write_pointer
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_invariant(ring: &RingBuffer) {
        let capacity = ring.capacity();
        assert!(ring.len() <= capacity);
        assert_eq!(
            (ring.read_pointer() + ring.len()) % capacity,
            ring.write_pointer()
        );
        if ring.len() < capacity {
            assert_eq!(
                (ring.write_pointer() + capacity - ring.read_pointer()) % capacity,
                ring.len()
            );
        }
    }

    /// Fill and drain so that both cursors end up at `position`, empty.
    fn positioned(capacity: usize, position: usize) -> RingBuffer {
        let mut ring = RingBuffer::with_capacity(capacity);
        ring.write(&vec![0; position]).unwrap();
        let mut sink = vec![0; position];
        assert_eq!(ring.read(&mut sink), position);
        ring
    }

    #[test]
    fn write_then_read_preserves_bytes() {
        let mut ring = RingBuffer::with_capacity(8);
        ring.write(b"hello").unwrap();
        assert_eq!(ring.len(), 5);
        let mut out = [0u8; 8];
        assert_eq!(ring.read(&mut out), 5);
        assert_eq!(&out[..5], b"hello");
        assert!(ring.is_empty());
        assert_invariant(&ring);
    }

    #[test]
    fn write_wraps_in_two_segments() {
        let mut ring = positioned(10, 7);
        let mut segments = Vec::new();
        ring.write_with(6, |segment, offset| {
            segments.push((segment.len(), offset));
            for (i, byte) in segment.iter_mut().enumerate() {
                *byte = (offset + i) as u8;
            }
        })
        .unwrap();
        assert_eq!(segments, [(3, 0), (3, 3)]);
        assert_eq!(ring.write_pointer(), 3);
        let mut out = [0u8; 6];
        assert_eq!(ring.read(&mut out), 6);
        assert_eq!(out, [0, 1, 2, 3, 4, 5]);
        assert_invariant(&ring);
    }

    #[test]
    fn write_ending_at_capacity_wraps_pointer_to_zero() {
        let mut ring = positioned(10, 4);
        ring.write(&[1; 6]).unwrap();
        assert_eq!(ring.write_pointer(), 0);
        assert_invariant(&ring);
    }

    #[test]
    fn overflow_is_rejected_without_side_effects() {
        let mut ring = RingBuffer::with_capacity(200);
        ring.write(&[1; 150]).unwrap();
        assert_eq!(
            ring.write(&[2; 100]),
            Err(Overflow {
                free: 50,
                incoming: 100
            })
        );
        assert_eq!(ring.len(), 150);
        assert_eq!(ring.write_pointer(), 150);
    }

    #[test]
    fn full_buffer_keeps_cursors_equal() {
        let mut ring = positioned(16, 9);
        ring.write(&[3; 16]).unwrap();
        assert_eq!(ring.free(), 0);
        assert_eq!(ring.read_pointer(), ring.write_pointer());
        assert_invariant(&ring);
        assert!(ring.write(&[0]).is_err());
    }

    #[test]
    fn read_reports_each_segment() {
        let mut ring = RingBuffer::with_capacity(200);
        ring.write(&[0; 190]).unwrap();
        let mut sink = [0u8; 180];
        ring.read(&mut sink);
        ring.write(&(0..140).map(|i| i as u8).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(ring.read_pointer(), 180);
        assert_eq!(ring.len(), 150);

        let mut segments = Vec::new();
        let mut out = [0u8; 60];
        assert_eq!(ring.read_with(&mut out, |n| segments.push(n)), 60);
        assert_eq!(segments, [20, 40]);
        assert_eq!(ring.read_pointer(), 40);
        assert_eq!(&out[..10], &[0; 10]);
        assert_eq!(out[10], 0);
        assert_eq!(out[59], 49);
        assert_invariant(&ring);
    }

    #[test]
    fn read_without_wrap_is_a_single_segment() {
        let mut ring = RingBuffer::with_capacity(200);
        ring.write(&[0; 190]).unwrap();
        let mut sink = [0u8; 140];
        ring.read(&mut sink);
        ring.write(&[1; 100]).unwrap();
        assert_eq!((ring.read_pointer(), ring.len()), (140, 150));

        let mut segments = Vec::new();
        let mut out = [0u8; 60];
        assert_eq!(ring.read_with(&mut out, |n| segments.push(n)), 60);
        assert_eq!(segments, [60]);
        assert_eq!(ring.read_pointer(), 0);
    }

    #[test]
    fn zero_length_operations_change_nothing() {
        let mut ring = positioned(8, 5);
        ring.write(b"ab").unwrap();
        let mut calls = 0;
        assert_eq!(ring.read_with(&mut [], |_| calls += 1), 0);
        ring.write(&[]).unwrap();
        assert_eq!(calls, 0);
        assert_eq!(
            (ring.read_pointer(), ring.write_pointer(), ring.len()),
            (5, 7, 2)
        );
    }

    #[test]
    fn arbitrary_chunking_preserves_order() {
        let data: Vec<u8> = (0..=255).cycle().take(5000).collect();
        let mut ring = RingBuffer::with_capacity(97);
        let mut out = Vec::new();
        let mut input = &data[..];
        let sizes = [1usize, 13, 96, 97, 42, 7, 60];
        let mut step = 0;
        while !input.is_empty() || !ring.is_empty() {
            let size = sizes[step % sizes.len()];
            let chunk = size.min(input.len()).min(ring.free());
            ring.write(&input[..chunk]).unwrap();
            input = &input[chunk..];
            assert_invariant(&ring);

            let mut buf = vec![0u8; sizes[(step + 3) % sizes.len()]];
            let n = ring.read(&mut buf);
            out.extend_from_slice(&buf[..n]);
            assert_invariant(&ring);
            step += 1;
        }
        assert_eq!(out, data);
    }
}
