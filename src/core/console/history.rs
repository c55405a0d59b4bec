use std::collections::VecDeque;

/// Size cap with hysteresis shared by all console histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimPolicy {
    /// Maximum length in bytes; 0 disables the cap.
    pub size_limit: usize,
    /// Each trim removes `size_limit / hysteresis_percent` bytes beyond the
    /// overflow; 0 trims exactly the overflow.
    pub hysteresis_percent: usize,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            size_limit: 1024 * 1024,
            hysteresis_percent: 10,
        }
    }
}

impl TrimPolicy {
    /// Bytes to drop from the front of a buffer of length `len`.
    pub fn excess(&self, len: usize) -> usize {
        if self.size_limit == 0 || len <= self.size_limit {
            return 0;
        }
        let extra = self
            .size_limit
            .checked_div(self.hysteresis_percent)
            .unwrap_or(0)
            .min(self.size_limit);
        (len - self.size_limit + extra).min(len)
    }
}

/// Lengths of one stretch of history in each form.
///
/// A segment with `raw > 0` holds received bytes that are identical in all
/// three forms (`raw == ascii == stamped`) and may be cut anywhere. A segment
/// with `raw == 0` holds bytes that exist only in the derived forms (wrap
/// terminators, timestamps) and is only ever dropped whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Segment {
    raw: usize,
    ascii: usize,
    stamped: usize,
}

impl Segment {
    fn is_empty(&self) -> bool {
        self.raw == 0 && self.ascii == 0 && self.stamped == 0
    }

    fn is_source(&self) -> bool {
        self.raw > 0
    }

    /// Merge `other` into `self` when both are of the same kind.
    fn absorb(&mut self, other: Segment) -> bool {
        if self.is_source() != other.is_source() {
            return false;
        }
        self.raw += other.raw;
        self.ascii += other.ascii;
        self.stamped += other.stamped;
        true
    }
}

/// One `put_data` call in all three forms.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub raw: Vec<u8>,
    pub ascii: Vec<u8>,
    pub stamped: Vec<u8>,
    segments: Vec<Segment>,
}

impl Chunk {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            raw: Vec::with_capacity(len),
            ascii: Vec::with_capacity(len),
            stamped: Vec::with_capacity(len),
            segments: Vec::new(),
        }
    }

    /// A received byte.
    pub fn push_source(&mut self, byte: u8) {
        self.raw.push(byte);
        self.ascii.push(byte);
        self.stamped.push(byte);
        self.push_segment(Segment {
            raw: 1,
            ascii: 1,
            stamped: 1,
        });
    }

    /// Bytes added by rendering rather than received.
    pub fn push_injected(&mut self, ascii: &[u8], stamped: &[u8]) {
        self.ascii.extend_from_slice(ascii);
        self.stamped.extend_from_slice(stamped);
        self.push_segment(Segment {
            raw: 0,
            ascii: ascii.len(),
            stamped: stamped.len(),
        });
    }

    fn push_segment(&mut self, segment: Segment) {
        if segment.is_empty() {
            return;
        }
        if !self.segments.last_mut().is_some_and(|last| last.absorb(segment)) {
            self.segments.push(segment);
        }
    }
}

/// The raw, soft-wrapped and timestamped histories.
///
/// All three are trimmed together at the same received byte, so switching
/// between hex and text views always shows the same stretch of the stream.
/// Every history stays within the [`TrimPolicy`] limit.
#[derive(Debug, Clone, Default)]
pub struct Histories {
    raw: Vec<u8>,
    ascii: Vec<u8>,
    stamped: Vec<u8>,
    segments: VecDeque<Segment>,
    policy: TrimPolicy,
}

impl Histories {
    pub fn new(policy: TrimPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Append `chunk` and trim; returns the number of raw bytes dropped.
    pub fn append(&mut self, chunk: Chunk) -> usize {
        self.raw.extend_from_slice(&chunk.raw);
        self.ascii.extend_from_slice(&chunk.ascii);
        self.stamped.extend_from_slice(&chunk.stamped);
        for segment in chunk.segments {
            if !self.segments.back_mut().is_some_and(|last| last.absorb(segment)) {
                self.segments.push_back(segment);
            }
        }
        self.trim()
    }

    pub fn set_policy(&mut self, policy: TrimPolicy) -> usize {
        self.policy = policy;
        self.trim()
    }

    fn trim(&mut self) -> usize {
        let mut need = [
            self.policy.excess(self.raw.len()),
            self.policy.excess(self.ascii.len()),
            self.policy.excess(self.stamped.len()),
        ];
        let mut dropped = Segment::default();
        while need.iter().any(|&n| n > 0) {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            let cut = if front.is_source() {
                let take = need.iter().copied().max().unwrap_or(0).min(front.raw);
                Segment {
                    raw: take,
                    ascii: take,
                    stamped: take,
                }
            } else {
                *front
            };
            front.raw -= cut.raw;
            front.ascii -= cut.ascii;
            front.stamped -= cut.stamped;
            if front.is_empty() {
                self.segments.pop_front();
            }
            need[0] = need[0].saturating_sub(cut.raw);
            need[1] = need[1].saturating_sub(cut.ascii);
            need[2] = need[2].saturating_sub(cut.stamped);
            dropped.raw += cut.raw;
            dropped.ascii += cut.ascii;
            dropped.stamped += cut.stamped;
        }
        self.raw.drain(..dropped.raw);
        self.ascii.drain(..dropped.ascii);
        self.stamped.drain(..dropped.stamped);
        dropped.raw
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn ascii(&self) -> &[u8] {
        &self.ascii
    }

    pub fn stamped(&self) -> &[u8] {
        &self.stamped
    }

    /// The last `n` raw bytes (fewer if the history is shorter).
    pub fn raw_tail(&self, n: usize) -> &[u8] {
        &self.raw[self.raw.len().saturating_sub(n)..]
    }

    pub fn is_empty(&self) -> bool {
        self.stamped.is_empty()
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.ascii.clear();
        self.stamped.clear();
        self.segments.clear();
    }
}
