// Completed duty cycle record and its fixed-size binary schema
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// A record type that serializes to exactly `SIZE` bytes.
///
/// The durable ring buffer stores one record per slot and only checks `SIZE`
/// when reopening a backing file. Two schemas with the same byte length but a
/// different field layout are indistinguishable on disk.
pub trait FixedRecord: Sized {
    const SIZE: usize;

    fn encode(&self, buf: &mut impl BufMut);

    /// `buf` is guaranteed to hold at least `SIZE` bytes.
    fn decode(buf: &mut impl Buf) -> Self;
}

/// One contiguous ON interval of the monitored device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    /// Cycle start, ms since the Unix epoch
    #[serde(rename = "date")]
    pub start_ms: i64,
    #[serde(rename = "runSec")]
    pub duration_secs: f64,
}

impl CycleRecord {
    pub fn new(start_ms: i64, duration_secs: f64) -> Self {
        Self {
            start_ms,
            duration_secs,
        }
    }

    pub fn from_run(start_ms: i64, run_ms: i64) -> Self {
        Self::new(start_ms, run_ms as f64 / 1000.0)
    }

    /// End of the cycle, ms since the Unix epoch
    pub fn end_ms(&self) -> i64 {
        self.start_ms
            .saturating_add((self.duration_secs * 1000.0).round() as i64)
    }
}

impl FixedRecord for CycleRecord {
    const SIZE: usize = 16;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i64(self.start_ms);
        buf.put_f64(self.duration_secs);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let start_ms = buf.get_i64();
        let duration_secs = buf.get_f64();
        Self {
            start_ms,
            duration_secs,
        }
    }
}
