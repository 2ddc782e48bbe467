//! Gapless playback scheduling
//!
//! Each fragment starts where the previous one ends, or immediately if the
//! output clock has already passed that point.

use std::collections::HashSet;

use crate::Result;
use crate::voice::{PcmBuffer, PlaybackHandle, PlaybackScheduler};

/// Schedule cursor plus the set of buffers still playing
#[derive(Debug, Default)]
pub struct PlaybackSchedule {
    next_start_time: f64,
    active: HashSet<PlaybackHandle>,
}

impl PlaybackSchedule {
    /// Empty schedule with the cursor at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a buffer after everything already scheduled
    ///
    /// Returns the start time it was scheduled at.
    ///
    /// # Errors
    ///
    /// Returns error if the output rejects the buffer
    pub fn enqueue<P: PlaybackScheduler + ?Sized>(
        &mut self,
        output: &mut P,
        buffer: &PcmBuffer,
    ) -> Result<f64> {
        let start = self.next_start_time.max(output.current_time());
        let handle = output.schedule(buffer, start)?;

        self.active.insert(handle);
        self.next_start_time = start + buffer.duration();

        tracing::trace!(
            handle = handle.0,
            start,
            duration = buffer.duration(),
            "playback scheduled"
        );
        Ok(start)
    }

    /// A buffer finished naturally
    pub fn finished(&mut self, handle: PlaybackHandle) {
        self.active.remove(&handle);
    }

    /// Stop everything still playing and rewind the cursor
    ///
    /// Returns how many buffers were stopped.
    pub fn interrupt<P: PlaybackScheduler + ?Sized>(&mut self, output: &mut P) -> usize {
        let stopped = self.active.len();
        for handle in self.active.drain() {
            output.stop(handle);
        }
        self.next_start_time = 0.0;
        stopped
    }

    /// Forget all state without touching the output
    pub fn reset(&mut self) {
        self.active.clear();
        self.next_start_time = 0.0;
    }

    /// Time the next fragment will start at, at the earliest
    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Number of buffers scheduled and not yet finished
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether `handle` is still playing
    #[must_use]
    pub fn is_active(&self, handle: PlaybackHandle) -> bool {
        self.active.contains(&handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeOutput {
        now: f64,
        next: u64,
        starts: Vec<f64>,
        stopped: Vec<PlaybackHandle>,
    }

    impl PlaybackScheduler for FakeOutput {
        fn resume(&mut self) -> Result<()> {
            Ok(())
        }

        fn current_time(&self) -> f64 {
            self.now
        }

        fn schedule(&mut self, _buffer: &PcmBuffer, start_at: f64) -> Result<PlaybackHandle> {
            self.next += 1;
            self.starts.push(start_at);
            Ok(PlaybackHandle(self.next))
        }

        fn stop(&mut self, handle: PlaybackHandle) {
            self.stopped.push(handle);
        }
    }

    fn half_second() -> PcmBuffer {
        PcmBuffer::new(vec![0.0; 12000], 24000, 1).unwrap()
    }

    #[test]
    fn test_fragments_play_back_to_back() {
        let mut output = FakeOutput {
            now: 2.0,
            ..FakeOutput::default()
        };
        let mut schedule = PlaybackSchedule::new();

        for _ in 0..3 {
            schedule.enqueue(&mut output, &half_second()).unwrap();
        }

        assert_eq!(output.starts, vec![2.0, 2.5, 3.0]);
        assert!((schedule.next_start_time() - 3.5).abs() < 1e-9);
        assert_eq!(schedule.active_count(), 3);
    }

    #[test]
    fn test_late_fragment_starts_now() {
        let mut output = FakeOutput::default();
        let mut schedule = PlaybackSchedule::new();

        schedule.enqueue(&mut output, &half_second()).unwrap();
        output.now = 4.0;
        let start = schedule.enqueue(&mut output, &half_second()).unwrap();

        assert!((start - 4.0).abs() < f64::EPSILON);
        assert!((schedule.next_start_time() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_interrupt_stops_active_and_rewinds() {
        let mut output = FakeOutput::default();
        let mut schedule = PlaybackSchedule::new();

        schedule.enqueue(&mut output, &half_second()).unwrap();
        schedule.enqueue(&mut output, &half_second()).unwrap();
        schedule.enqueue(&mut output, &half_second()).unwrap();
        schedule.finished(PlaybackHandle(1));

        assert_eq!(schedule.interrupt(&mut output), 2);
        output.stopped.sort();
        assert_eq!(output.stopped, vec![PlaybackHandle(2), PlaybackHandle(3)]);
        assert_eq!(schedule.active_count(), 0);
        assert!(schedule.next_start_time().abs() < f64::EPSILON);
    }

    #[test]
    fn test_finished_unknown_handle_is_ignored() {
        let mut schedule = PlaybackSchedule::new();
        schedule.finished(PlaybackHandle(42));
        assert_eq!(schedule.active_count(), 0);
    }
}
