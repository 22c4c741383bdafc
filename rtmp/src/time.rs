//! RTMP timestamps are 32 bit millisecond counters relative to an arbitrary epoch.
//!
//! A live stream can outlast the 49.7 days a `u32` can count, so timestamps wrap around.  Two
//! timestamps are considered adjacent when they are within 2<sup>31</sup> - 1 milliseconds of
//! each other, which lets comparisons keep working across the wrap.
//!
//! ```
//! use ingest_rtmp::time::RtmpTimestamp;
//!
//! let before_wrap = RtmpTimestamp::new(u32::MAX - 5);
//! let after_wrap = before_wrap + 10;
//!
//! assert_eq!(after_wrap, 4);
//! assert!(after_wrap > before_wrap);
//! ```

use std::cmp::Ordering;
use std::ops::{Add, Sub};
use std::time::Instant;

const MAX_ADJACENT_DIFFERENCE: u32 = 2_147_483_647;

/// A wrapping RTMP timestamp
#[derive(Eq, PartialEq, Debug, Copy, Clone, Default, Hash)]
pub struct RtmpTimestamp {
    pub value: u32,
}

impl RtmpTimestamp {
    pub fn new(value: u32) -> Self {
        RtmpTimestamp { value }
    }

    pub fn set(&mut self, value: u32) {
        self.value = value;
    }

    /// Milliseconds elapsed since `start`, truncated into the wrapping 32 bit range
    pub fn since(start: Instant) -> Self {
        RtmpTimestamp::new(start.elapsed().as_millis() as u32)
    }
}

impl Add for RtmpTimestamp {
    type Output = RtmpTimestamp;

    fn add(self, other: RtmpTimestamp) -> Self {
        self + other.value
    }
}

impl Add<u32> for RtmpTimestamp {
    type Output = RtmpTimestamp;

    fn add(self, other: u32) -> Self {
        RtmpTimestamp::new(self.value.wrapping_add(other))
    }
}

impl Sub for RtmpTimestamp {
    type Output = RtmpTimestamp;

    fn sub(self, other: RtmpTimestamp) -> Self {
        self - other.value
    }
}

impl Sub<u32> for RtmpTimestamp {
    type Output = RtmpTimestamp;

    fn sub(self, other: u32) -> Self {
        RtmpTimestamp::new(self.value.wrapping_sub(other))
    }
}

impl Ord for RtmpTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self.value, other.value)
    }
}

impl PartialOrd for RtmpTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq<u32> for RtmpTimestamp {
    fn eq(&self, other: &u32) -> bool {
        self.value == *other
    }
}

impl PartialOrd<u32> for RtmpTimestamp {
    fn partial_cmp(&self, other: &u32) -> Option<Ordering> {
        Some(compare(self.value, *other))
    }
}

fn compare(left: u32, right: u32) -> Ordering {
    let difference = left.max(right) - left.min(right);
    if difference <= MAX_ADJACENT_DIFFERENCE {
        left.cmp(&right)
    } else {
        right.cmp(&left)
    }
}
