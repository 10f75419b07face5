/*!
 * Batch construction.
 *
 * Greedy packing of segments into request-sized batches, in document order.
 */

use crate::document::Segment;

/// Limits applied to one provider request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum total inner-markup characters
    pub max_chars: usize,
    /// Maximum number of segments
    pub max_segments: usize,
}

impl BatchLimits {
    pub fn new(max_chars: usize, max_segments: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            max_segments: max_segments.max(1),
        }
    }
}

/// Group segments into batches under `limits`
///
/// A segment larger than `max_chars` on its own becomes a single-segment
/// batch; content is never truncated.
pub fn build_batches(segments: &[Segment], limits: BatchLimits) -> Vec<Vec<Segment>> {
    let mut batches = Vec::new();
    let mut current: Vec<Segment> = Vec::new();
    let mut current_size = 0usize;

    for segment in segments {
        let size = segment.size();
        let fits = current_size + size <= limits.max_chars && current.len() < limits.max_segments;
        if !current.is_empty() && !fits {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(segment.clone());
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
