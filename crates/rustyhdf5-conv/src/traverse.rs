//! Element traversal for in-place conversion.
//!
//! Conversion rewrites a buffer of source elements into destination
//! elements at the same base address. When the destination is smaller the
//! buffer is walked front to back; when it is larger, back to front, so
//! that no source element is overwritten before it has been read. Elements
//! whose source and destination byte ranges intersect must be staged
//! through a scratch element.

/// Walk order over the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// One element visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Element index.
    pub index: usize,
    /// Byte offset of the source element.
    pub src: usize,
    /// Byte offset of the destination element.
    pub dst: usize,
    /// Whether the source and destination ranges may intersect.
    pub overlaps: bool,
}

/// Traversal plan for `nelmts` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Traversal {
    pub direction: Direction,
    /// Number of leading (by index) elements that may overlap.
    pub olap: usize,
    pub nelmts: usize,
    pub src_stride: usize,
    pub dst_stride: usize,
}

fn div_ceil(a: usize, b: usize) -> usize {
    a / b + usize::from(a % b != 0)
}

/// Bytes spanned by `nelmts` elements of `size` bytes placed `stride`
/// apart. Saturates at `usize::MAX` so that a bogus element count fails
/// the buffer length check instead of wrapping.
pub fn span(nelmts: usize, stride: usize, size: usize) -> usize {
    match nelmts.checked_sub(1) {
        None => 0,
        Some(last) => last
            .checked_mul(stride)
            .and_then(|n| n.checked_add(size))
            .unwrap_or(usize::MAX),
    }
}

impl Traversal {
    /// Plan a walk that also counts overlapping elements.
    ///
    /// With equal sizes or an explicit stride every element is converted in
    /// place. A shrinking conversion walks forward and only the first
    /// `ceil(dst / (src - dst))` elements overlap; a growing one walks
    /// backward and the first `ceil(src / (dst - src))` elements overlap.
    pub fn plan(src_size: usize, dst_size: usize, buf_stride: usize, nelmts: usize) -> Self {
        let (direction, olap) = if src_size == dst_size || buf_stride != 0 {
            (Direction::Forward, nelmts)
        } else if src_size > dst_size {
            (Direction::Forward, div_ceil(dst_size, src_size - dst_size))
        } else {
            (Direction::Backward, div_ceil(src_size, dst_size - src_size))
        };
        Self::with(direction, olap, src_size, dst_size, buf_stride, nelmts)
    }

    /// Plan a walk that only picks the direction.
    ///
    /// Used by converters that always stage elements: forward when the
    /// destination is no larger or a stride is given, backward otherwise.
    pub fn plan_direction(
        src_size: usize,
        dst_size: usize,
        buf_stride: usize,
        nelmts: usize,
    ) -> Self {
        let direction = if buf_stride != 0 || src_size >= dst_size {
            Direction::Forward
        } else {
            Direction::Backward
        };
        Self::with(direction, 0, src_size, dst_size, buf_stride, nelmts)
    }

    fn with(
        direction: Direction,
        olap: usize,
        src_size: usize,
        dst_size: usize,
        buf_stride: usize,
        nelmts: usize,
    ) -> Self {
        let (src_stride, dst_stride) = if buf_stride != 0 {
            (buf_stride, buf_stride)
        } else {
            (src_size, dst_size)
        };
        Self {
            direction,
            olap: olap.min(nelmts),
            nelmts,
            src_stride,
            dst_stride,
        }
    }

    /// Bytes the buffer must hold for this walk.
    pub fn required_len(&self, src_size: usize, dst_size: usize) -> usize {
        span(self.nelmts, self.src_stride, src_size).max(span(self.nelmts, self.dst_stride, dst_size))
    }

    /// Visit every element in walk order.
    pub fn steps(&self) -> impl Iterator<Item = Step> + '_ {
        let n = self.nelmts;
        (0..n).map(move |k| {
            let index = match self.direction {
                Direction::Forward => k,
                Direction::Backward => n - 1 - k,
            };
            Step {
                index,
                src: index * self.src_stride,
                dst: index * self.dst_stride,
                overlaps: index < self.olap,
            }
        })
    }
}

/// A run of elements processed together by [`safe_segments`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Index of the lowest element.
    pub start: usize,
    pub count: usize,
    pub direction: Direction,
}

impl Segment {
    /// Element indices in processing order.
    pub fn indices(&self) -> Box<dyn Iterator<Item = usize>> {
        let range = self.start..self.start + self.count;
        match self.direction {
            Direction::Forward => Box::new(range),
            Direction::Backward => Box::new(range.rev()),
        }
    }
}

/// Split `nelmts` elements into runs that can be converted without
/// reading clobbered sources.
///
/// When the destination stride exceeds the source stride, the tail of the
/// buffer holds elements whose destinations lie past every unread source;
/// those are converted forward first. Once fewer than two such elements
/// remain, the rest is converted back to front. Otherwise one forward run
/// suffices.
pub fn safe_segments(s_stride: usize, d_stride: usize, nelmts: usize) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut remaining = nelmts;
    while remaining > 0 {
        if d_stride > s_stride {
            let safe = remaining - div_ceil(remaining * s_stride, d_stride);
            if safe < 2 {
                segments.push(Segment {
                    start: 0,
                    count: remaining,
                    direction: Direction::Backward,
                });
                remaining = 0;
            } else {
                segments.push(Segment {
                    start: remaining - safe,
                    count: safe,
                    direction: Direction::Forward,
                });
                remaining -= safe;
            }
        } else {
            segments.push(Segment {
                start: 0,
                count: remaining,
                direction: Direction::Forward,
            });
            remaining = 0;
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intersects(s: &Step, src_size: usize, dst_size: usize) -> bool {
        s.src < s.dst + dst_size && s.dst < s.src + src_size
    }

    #[test]
    fn shrinking_walks_forward() {
        let t = Traversal::plan(10, 6, 0, 5);
        assert_eq!(t.direction, Direction::Forward);
        assert_eq!(t.olap, 2);
        let steps: Vec<_> = t.steps().collect();
        assert_eq!(steps[0].index, 0);
        assert_eq!(steps[4].src, 40);
        assert_eq!(steps[4].dst, 24);
    }

    #[test]
    fn growing_walks_backward() {
        let t = Traversal::plan(2, 4, 0, 4);
        assert_eq!(t.direction, Direction::Backward);
        assert_eq!(t.olap, 1);
        let idx: Vec<_> = t.steps().map(|s| s.index).collect();
        assert_eq!(idx, vec![3, 2, 1, 0]);
        assert_eq!(t.required_len(2, 4), 16);
    }

    #[test]
    fn stride_forces_in_place() {
        let t = Traversal::plan(2, 4, 8, 3);
        assert_eq!(t.direction, Direction::Forward);
        assert_eq!(t.olap, 3);
        assert_eq!(t.src_stride, 8);
        assert_eq!(t.dst_stride, 8);
        assert_eq!(t.required_len(2, 4), 20);
    }

    #[test]
    fn overlap_flag_matches_byte_ranges() {
        for (s, d) in [(10, 6), (6, 10), (3, 2), (2, 3), (8, 1), (1, 8), (5, 5)] {
            let t = Traversal::plan(s, d, 0, 12);
            for step in t.steps() {
                if intersects(&step, s, d) {
                    assert!(step.overlaps, "{s}->{d} element {}", step.index);
                }
            }
        }
    }

    #[test]
    fn direction_only_plan() {
        assert_eq!(
            Traversal::plan_direction(4, 4, 0, 2).direction,
            Direction::Forward
        );
        assert_eq!(
            Traversal::plan_direction(1, 4, 0, 2).direction,
            Direction::Backward
        );
        assert_eq!(
            Traversal::plan_direction(1, 4, 4, 2).direction,
            Direction::Forward
        );
        assert_eq!(Traversal::plan_direction(1, 4, 0, 0).steps().count(), 0);
    }

    #[test]
    fn segments_cover_every_element_once() {
        for (s, d, n) in [(8, 64, 10), (12, 64, 7), (64, 8, 5), (8, 8, 3), (8, 64, 1), (8, 16, 100)] {
            let mut seen = vec![0u32; n];
            for seg in safe_segments(s, d, n) {
                for i in seg.indices() {
                    seen[i] += 1;
                }
            }
            assert!(seen.iter().all(|&c| c == 1), "{s}->{d} x{n}");
        }
    }

    #[test]
    fn segments_shape() {
        // 10 * 8 / 64 rounds up to 2, so the last 8 elements are safe
        let segs = safe_segments(8, 64, 10);
        assert_eq!(
            segs[0],
            Segment {
                start: 2,
                count: 8,
                direction: Direction::Forward
            }
        );
        assert_eq!(segs.last().map(|s| s.direction), Some(Direction::Backward));
        assert_eq!(safe_segments(64, 8, 4).len(), 1);
        assert!(safe_segments(8, 64, 0).is_empty());
    }

    #[test]
    fn span_saturates() {
        assert_eq!(span(0, 8, 4), 0);
        assert_eq!(span(3, 8, 4), 20);
        assert_eq!(span(usize::MAX, 4, 4), usize::MAX);
        assert_eq!(span(2, usize::MAX, 1), usize::MAX);
        let plan = Traversal::plan(4, 8, 0, usize::MAX);
        assert_eq!(plan.required_len(4, 8), usize::MAX);
    }
}
