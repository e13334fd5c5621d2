use super::{AggregateRecorder, Record, Recorder};

/// Buffered recorder.
///
/// Keeps every written record in memory. Stored records are merged and tagged with
/// the step given to [`AggregateRecorder::flush`].
#[derive(Default)]
pub struct BufferedRecorder {
    buf: Vec<(i64, Record)>,
    pending: Record,
}

impl BufferedRecorder {
    /// Construct the recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an iterator over the records and their steps.
    pub fn iter(&self) -> std::slice::Iter<(i64, Record)> {
        self.buf.iter()
    }

    /// Returns the values of a scalar key in the order they were flushed.
    pub fn scalars(&self, key: &str) -> Vec<(i64, f32)> {
        self.buf
            .iter()
            .filter_map(|(step, r)| r.get_scalar(key).ok().map(|v| (*step, v)))
            .collect()
    }
}

impl Recorder for BufferedRecorder {
    /// Write a [`Record`] to the buffer without a step.
    fn write(&mut self, record: Record) {
        self.buf.push((-1, record));
    }
}

impl AggregateRecorder for BufferedRecorder {
    fn store(&mut self, record: Record) {
        self.pending.merge_inplace(record);
    }

    fn flush(&mut self, step: i64) {
        if !self.pending.is_empty() {
            let record = std::mem::take(&mut self.pending);
            self.buf.push((step, record));
        }
    }
}
