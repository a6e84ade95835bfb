use std::collections::VecDeque;

use crate::error::{Error, Result};

/// Source of consecutive segments for a [`SlidingBuffer`].
pub trait SegmentProducer {
    type Segment;

    /// Produce the segment whose first entity is `origin`, at most `len`
    /// entities long. Returns the segment and its actual length; a length of
    /// zero means the source is exhausted.
    fn generate(&mut self, origin: usize, len: usize) -> Result<(Self::Segment, usize)>;

    /// Whether another call to [`generate`](Self::generate) can yield data.
    fn more(&self) -> bool;
}

struct Stored<S> {
    len: usize,
    data: S,
}

/// Window over a long sequence generated one fixed-size segment at a time.
///
/// Segments are produced strictly in order and never regenerated. At most
/// `capacity` are kept; appending beyond that evicts the oldest, after which
/// any index inside it fails with [`Error::Underflow`].
pub struct SlidingBuffer<P: SegmentProducer> {
    producer: P,
    capacity: usize,
    segment_size: usize,
    segments: VecDeque<Stored<P::Segment>>,
    /// Number of the segment the next generate call produces.
    next_segment: usize,
    produced: usize,
    exhausted: bool,
}

impl<P: SegmentProducer> SlidingBuffer<P> {
    pub fn new(producer: P, capacity: usize, segment_size: usize) -> Result<Self> {
        if capacity == 0 || segment_size == 0 {
            return Err(Error::InvalidParameter(format!(
                "sliding buffer needs a non-empty segment, got {capacity} x {segment_size}"
            )));
        }
        Ok(Self {
            producer,
            capacity,
            segment_size,
            segments: VecDeque::with_capacity(capacity),
            next_segment: 0,
            produced: 0,
            exhausted: false,
        })
    }

    /// Resolve an absolute index to its segment and the offset within it,
    /// generating forward as needed.
    pub fn locate(&mut self, index: usize) -> Result<(&P::Segment, usize)> {
        let number = index / self.segment_size;
        let offset = index % self.segment_size;

        let oldest = self.oldest_segment();
        if number < oldest {
            return Err(Error::Underflow {
                index,
                oldest: self.oldest_available(),
            });
        }
        while number >= self.next_segment {
            self.advance(index)?;
        }

        let stored = &self.segments[number - self.oldest_segment()];
        if offset >= stored.len {
            return Err(Error::Exhausted {
                index,
                available: self.produced,
            });
        }
        Ok((&stored.data, offset))
    }

    fn advance(&mut self, index: usize) -> Result<()> {
        if self.exhausted || !self.producer.more() {
            self.exhausted = true;
            return Err(Error::Exhausted {
                index,
                available: self.produced,
            });
        }
        let origin = self.next_segment * self.segment_size;
        let (data, len) = self.producer.generate(origin, self.segment_size)?;
        if len == 0 {
            self.exhausted = true;
            return Err(Error::Exhausted {
                index,
                available: self.produced,
            });
        }
        if self.segments.len() == self.capacity {
            log::debug!("Evicting segment {}", self.oldest_segment());
            self.segments.pop_front();
        }
        self.segments.push_back(Stored { len, data });
        self.next_segment += 1;
        self.produced += len;
        if len < self.segment_size {
            self.exhausted = true;
        }
        Ok(())
    }

    fn oldest_segment(&self) -> usize {
        self.next_segment - self.segments.len()
    }

    /// First index still retained.
    pub fn oldest_available(&self) -> usize {
        self.oldest_segment() * self.segment_size
    }

    /// Entities generated so far.
    pub fn produced(&self) -> usize {
        self.produced
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts upwards, `limit` entities in total.
    struct Counter {
        next: usize,
        limit: usize,
        calls: usize,
    }

    impl SegmentProducer for Counter {
        type Segment = Vec<usize>;

        fn generate(&mut self, origin: usize, len: usize) -> Result<(Vec<usize>, usize)> {
            assert_eq!(origin, self.next);
            self.calls += 1;
            let end = (origin + len).min(self.limit);
            self.next = end;
            let seg: Vec<usize> = (origin..end).collect();
            let n = seg.len();
            Ok((seg, n))
        }

        fn more(&self) -> bool {
            self.next < self.limit
        }
    }

    fn buffer(capacity: usize, size: usize, limit: usize) -> SlidingBuffer<Counter> {
        SlidingBuffer::new(Counter { next: 0, limit, calls: 0 }, capacity, size).unwrap()
    }

    fn get(buf: &mut SlidingBuffer<Counter>, index: usize) -> Result<usize> {
        buf.locate(index).map(|(seg, off)| seg[off])
    }

    #[test]
    fn generates_lazily_and_in_order() {
        let mut buf = buffer(3, 10, 1000);
        assert_eq!(get(&mut buf, 5).unwrap(), 5);
        assert_eq!(buf.producer().calls, 1);
        assert_eq!(get(&mut buf, 25).unwrap(), 25);
        assert_eq!(buf.producer().calls, 3);
        // Already buffered, nothing new generated
        assert_eq!(get(&mut buf, 3).unwrap(), 3);
        assert_eq!(buf.producer().calls, 3);
    }

    #[test]
    fn evicted_index_underflows_every_time() {
        let mut buf = buffer(2, 10, 1000);
        get(&mut buf, 35).unwrap();
        assert_eq!(buf.oldest_available(), 20);
        for _ in 0..3 {
            assert!(matches!(
                get(&mut buf, 19),
                Err(Error::Underflow { index: 19, oldest: 20 })
            ));
        }
        assert_eq!(get(&mut buf, 20).unwrap(), 20);
    }

    #[test]
    fn exhaustion_is_distinct_and_keeps_data() {
        let mut buf = buffer(4, 10, 25);
        assert!(matches!(
            get(&mut buf, 25),
            Err(Error::Exhausted { index: 25, available: 25 })
        ));
        assert!(matches!(get(&mut buf, 100), Err(Error::Exhausted { .. })));
        assert_eq!(get(&mut buf, 24).unwrap(), 24);
        assert_eq!(buf.produced(), 25);
    }

    #[test]
    fn rejects_empty_geometry() {
        assert!(SlidingBuffer::new(Counter { next: 0, limit: 1, calls: 0 }, 0, 10).is_err());
        assert!(SlidingBuffer::new(Counter { next: 0, limit: 1, calls: 0 }, 1, 0).is_err());
    }
}
