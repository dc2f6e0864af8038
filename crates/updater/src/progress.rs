/// A single progress observation during a download or upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    /// Bytes moved so far within the current attempt.
    pub bytes_transferred: u64,
    /// Total bytes expected, `0` when the total is unknown.
    pub total_bytes: u64,
    /// `bytes_transferred / total_bytes * 100`, `0.0` when the total is unknown.
    pub percentage: f32,
}

/// Caller-supplied sink receiving progress updates, invoked synchronously on
/// the transferring task. Implementations must not block for long or they
/// stall the transfer.
pub trait ProgressSink: Send {
    fn report(&mut self, progress: TransferProgress);
}

impl<F: FnMut(TransferProgress) + Send> ProgressSink for F {
    fn report(&mut self, progress: TransferProgress) {
        self(progress)
    }
}

/// Per-call progress accumulator.
///
/// Owns the deduplication state for exactly one in-flight transfer, so
/// concurrent transfers never share counters. Reports are produced only when
/// the running byte count actually changes.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    last: Option<u64>,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self { total, last: None }
    }

    /// Record the running byte count; returns a progress value only when the
    /// count differs from the previous observation.
    pub fn observe(&mut self, bytes_transferred: u64) -> Option<TransferProgress> {
        let bytes = if self.total > 0 {
            bytes_transferred.min(self.total)
        } else {
            bytes_transferred
        };

        if self.last == Some(bytes) {
            return None;
        }
        self.last = Some(bytes);

        let percentage = if self.total > 0 {
            bytes as f32 / self.total as f32 * 100.0
        } else {
            0.0
        };
        Some(TransferProgress {
            bytes_transferred: bytes,
            total_bytes: self.total,
            percentage,
        })
    }
}
