use bytes::Bytes;

/// Inbound data handed over by the stack with a receive event.
///
/// A payload is a chain of segments, the way a stack hands over data that
/// arrived in several packets. Consumers copy out of it with
/// [`Payload::copy_partial`] and never see segment boundaries.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Payload {
    segments: Vec<Bytes>,
    len: usize,
}

impl Payload {
    pub fn new() -> Payload {
        Payload::default()
    }

    /// Append a segment to the end of the chain.
    pub fn push(&mut self, segment: Bytes) {
        if segment.is_empty() {
            return;
        }
        self.len += segment.len();
        self.segments.push(segment);
    }

    /// Total number of bytes across all segments.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of segments in the chain
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Copy bytes starting at `offset` into `dest`.
    ///
    /// Copies `min(dest.len(), len() - offset)` bytes, crossing segment
    /// boundaries as needed, and returns the number of bytes copied.
    pub fn copy_partial(&self, dest: &mut [u8], offset: usize) -> usize {
        let mut skip = offset;
        let mut copied = 0;
        for segment in &self.segments {
            if copied == dest.len() {
                break;
            }
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let available = &segment[skip..];
            skip = 0;
            let n = available.len().min(dest.len() - copied);
            dest[copied..copied + n].copy_from_slice(&available[..n]);
            copied += n;
        }
        copied
    }

    /// Collect the payload into one contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0; self.len];
        self.copy_partial(&mut out, 0);
        out
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        let mut payload = Payload::new();
        payload.push(value);
        payload
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::from(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::from(Bytes::from(value))
    }
}

impl FromIterator<Bytes> for Payload {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        let mut payload = Payload::new();
        for segment in iter {
            payload.push(segment);
        }
        payload
    }
}

#[cfg(test)]
mod test {
    use super::Payload;
    use bytes::Bytes;

    fn chain() -> Payload {
        [
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"defg"),
            Bytes::from_static(b"hi"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn length_spans_all_segments() {
        let payload = chain();
        assert_eq!(payload.len(), 9);
        assert_eq!(payload.segment_count(), 3);
        assert_eq!(payload.to_vec(), b"abcdefghi");
    }

    #[test]
    fn copy_partial_crosses_segment_boundaries() {
        let payload = chain();
        let mut dest = [0u8; 5];
        assert_eq!(payload.copy_partial(&mut dest, 2), 5);
        assert_eq!(&dest, b"cdefg");
    }

    #[test]
    fn copy_partial_stops_at_end_of_chain() {
        let payload = chain();
        let mut dest = [0u8; 8];
        assert_eq!(payload.copy_partial(&mut dest, 6), 3);
        assert_eq!(&dest[..3], b"ghi");
        assert_eq!(payload.copy_partial(&mut dest, 9), 0);
    }

    #[test]
    fn empty_segments_are_skipped() {
        let mut payload = Payload::new();
        payload.push(Bytes::new());
        assert!(payload.is_empty());
        assert_eq!(payload.segment_count(), 0);
    }
}
