use std::ops::Range;

use bytes::{Bytes, BytesMut};

/// One contiguous slice of the uploaded stream.
#[derive(Debug)]
pub struct Part {
    /// 1-based, assigned in stream order.
    pub number: i32,
    /// Offsets of this part within the whole stream.
    pub range: Range<u64>,
    pub payload: Bytes,
}

impl Part {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Cuts a byte stream into parts of exactly `part_size` bytes, except the last.
#[derive(Debug)]
pub(crate) struct Partitioner {
    part_size: usize,
    buffer: BytesMut,
    next_number: i32,
    // start offset of the buffered bytes
    offset: u64,
}

impl Partitioner {
    pub(crate) fn new(part_size: usize) -> Self {
        Self {
            part_size,
            buffer: BytesMut::new(),
            next_number: 1,
            offset: 0,
        }
    }

    /// Moves bytes from the front of `input` into the buffer until either the
    /// input is exhausted or a full part is ready, in which case it is returned.
    pub(crate) fn fill(&mut self, input: &mut &[u8]) -> Option<Part> {
        if self.buffer.is_empty() {
            self.buffer.reserve(self.part_size);
        }
        let take = (self.part_size - self.buffer.len()).min(input.len());
        self.buffer.extend_from_slice(&input[..take]);
        *input = &input[take..];

        (self.buffer.len() == self.part_size).then(|| self.cut())
    }

    /// Emits the buffered remainder. With `emit_empty`, a stream that never
    /// produced a part yields a single empty one.
    pub(crate) fn finish(&mut self, emit_empty: bool) -> Option<Part> {
        let nothing_emitted = self.next_number == 1;
        if !self.buffer.is_empty() || (emit_empty && nothing_emitted) {
            Some(self.cut())
        } else {
            None
        }
    }

    pub(crate) fn parts_emitted(&self) -> usize {
        (self.next_number - 1) as usize
    }

    fn cut(&mut self) -> Part {
        let payload = self.buffer.split().freeze();
        let start = self.offset;
        self.offset += payload.len() as u64;

        let number = self.next_number;
        self.next_number += 1;

        Part {
            number,
            range: start..self.offset,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(part_size: usize, writes: &[&[u8]]) -> Vec<Part> {
        let mut partitioner = Partitioner::new(part_size);
        let mut parts = Vec::new();
        for write in writes {
            let mut input = *write;
            while !input.is_empty() {
                parts.extend(partitioner.fill(&mut input));
            }
        }
        parts.extend(partitioner.finish(false));
        parts
    }

    #[test]
    fn ten_bytes_in_parts_of_four() {
        let parts = split(4, &[b"abcdefghij"]);

        let payloads: Vec<&[u8]> = parts.iter().map(|p| p.payload.as_ref()).collect();
        assert_eq!(payloads, vec![&b"abcd"[..], b"efgh", b"ij"]);
        assert_eq!(parts.iter().map(|p| p.number).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(parts[2].range, 8..10);
    }

    #[test]
    fn part_count_is_ceiling_and_concatenation_matches() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        for part_size in [1, 3, 7, 64, 999, 1000, 1001] {
            // uneven writes that straddle part boundaries
            let writes: Vec<&[u8]> = data.chunks(13).collect();
            let parts = split(part_size, &writes);

            assert_eq!(parts.len(), data.len().div_ceil(part_size), "part size {part_size}");
            let joined: Vec<u8> = parts.iter().flat_map(|p| p.payload.iter().copied()).collect();
            assert_eq!(joined, data);
        }
    }

    #[test]
    fn ranges_follow_actual_lengths() {
        let parts = split(5, &[b"12", b"345678", b"9012345"]);

        let ranges: Vec<_> = parts.iter().map(|p| p.range.clone()).collect();
        assert_eq!(ranges, vec![0..5, 5..10, 10..15]);
        for part in &parts {
            assert_eq!(part.len() as u64, part.range.end - part.range.start);
        }
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let parts = split(4, &[b"abcdefgh"]);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.len() == 4));
    }

    #[test]
    fn empty_stream_emits_nothing_unless_asked() {
        let mut partitioner = Partitioner::new(4);
        assert!(partitioner.finish(false).is_none());

        let empty = partitioner.finish(true).expect("empty part");
        assert_eq!(empty.number, 1);
        assert!(empty.is_empty());
        assert_eq!(empty.range, 0..0);
        assert_eq!(partitioner.parts_emitted(), 1);
    }

    #[test]
    fn empty_part_is_never_added_after_real_data() {
        let mut partitioner = Partitioner::new(4);
        let mut input: &[u8] = b"abcd";
        assert!(partitioner.fill(&mut input).is_some());
        assert!(partitioner.finish(true).is_none());
    }
}
