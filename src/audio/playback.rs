//! Gapless, in-order scheduling of inbound audio chunks.
//!
//! A single cursor tracks where the next chunk starts on the output clock.
//! Chunks that arrive while the cursor is ahead of the clock are queued
//! back-to-back; a chunk that arrives after the clock has overtaken the
//! cursor (an underrun) starts immediately instead of replaying the backlog.

use std::collections::BTreeSet;

use crate::error::Result;

use super::OutputContext;

/// Identifies one scheduled buffer within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start_time: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler {
    sample_rate: u32,
    next_start_time: f64,
    active: BTreeSet<BufferId>,
    next_id: u64,
}

impl PlaybackScheduler {
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            next_start_time: 0.0,
            active: BTreeSet::new(),
            next_id: 0,
        }
    }

    /// Schedule `samples` right after the previously scheduled buffer, or now
    /// if the output clock has already passed that point.
    pub fn schedule(
        &mut self,
        output: &mut dyn OutputContext,
        samples: Vec<f32>,
    ) -> Result<ScheduledBuffer> {
        let now = output.current_time();
        if self.next_start_time < now {
            if self.next_start_time > 0.0 {
                tracing::debug!(
                    "playback underrun: cursor {:.3}s behind clock",
                    now - self.next_start_time
                );
            }
            self.next_start_time = now;
        }

        let duration = samples.len() as f64 / f64::from(self.sample_rate);
        let id = BufferId(self.next_id);
        self.next_id += 1;

        output.play(id, samples, self.next_start_time)?;

        let scheduled = ScheduledBuffer {
            id,
            start_time: self.next_start_time,
            duration,
        };
        self.next_start_time += duration;
        self.active.insert(id);

        tracing::trace!(
            "scheduled buffer {} at {:.3}s for {:.3}s",
            id.0,
            scheduled.start_time,
            duration
        );

        Ok(scheduled)
    }

    /// Mark a buffer as finished. Returns `false` for ids that are not active.
    pub fn finish(&mut self, id: BufferId) -> bool {
        self.active.remove(&id)
    }

    /// Stop every active buffer and forget it, whatever its progress.
    pub fn stop_all(&mut self, output: &mut dyn OutputContext) {
        for id in std::mem::take(&mut self.active) {
            output.stop(id);
        }
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }
}
