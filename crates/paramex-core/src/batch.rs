//! Batch run state machine
//!
//! ```text
//!            run()             begin_step()
//!   Idle ───────────▶ Running ─────────────▶ Stepping
//!    ▲                   ▲                      │ record()
//!    │                   └──── index < size ────┤
//!    │ mark_persisted()                         │ index == size
//!    └─────────────────────── Finished ◀────────┘
//! ```
//!
//! `reset()` returns to Idle from any state, discarding unpersisted samples.
//! A Finished batch whose save failed keeps its samples until it is either
//! persisted or reset.

use serde::{Deserialize, Serialize};

use paramex_wire::{Metadata, Sample, Score};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchState {
    /// No batch in progress
    Idle,
    /// `run()` was called; waiting for the next step
    Running,
    /// One play/render/capture cycle in flight
    Stepping,
    /// Size reached; samples await persistence
    Finished,
}

/// Result of recording one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// No step ran (batch not running)
    Idle,
    /// More steps are expected; the driver should schedule the next one
    Progress { index: usize, size: usize },
    /// The batch reached its size. `persisted` is false until the samples
    /// have been saved.
    Finished { samples: usize, persisted: bool },
}

/// Transient state of one exploration batch.
#[derive(Debug, Clone)]
pub struct BatchRun {
    state: BatchState,
    index: usize,
    size: usize,
    samples: Vec<Sample>,
    metadata: Vec<Metadata>,
}

impl Default for BatchRun {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRun {
    pub fn new() -> Self {
        Self {
            state: BatchState::Idle,
            index: 0,
            size: 1,
            samples: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, BatchState::Running | BatchState::Stepping)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Discard everything; returns the number of dropped samples.
    pub fn reset(&mut self) -> usize {
        let discarded = self.samples.len();
        *self = Self::new();
        discarded
    }

    /// Idle → Running. Idempotent while running.
    ///
    /// Refused (returns `false`) while a finished batch still awaits
    /// persistence.
    pub fn run(&mut self) -> bool {
        match self.state {
            BatchState::Idle => {
                self.state = BatchState::Running;
                true
            }
            BatchState::Running | BatchState::Stepping => true,
            BatchState::Finished => false,
        }
    }

    /// Running → Stepping, clamping the batch size to `[1, max]`.
    ///
    /// Returns `false` when no step may begin.
    pub fn begin_step(&mut self, requested_size: usize, max: usize) -> bool {
        if self.state != BatchState::Running {
            return false;
        }
        self.size = requested_size.clamp(1, max.max(1));
        self.state = BatchState::Stepping;
        true
    }

    /// Append the captured sample and advance.
    ///
    /// On the final step every sample is marked unscored and the batch
    /// becomes Finished.
    pub fn record(&mut self, sample: Sample, metadata: Metadata) -> StepOutcome {
        if self.state != BatchState::Stepping {
            return StepOutcome::Idle;
        }
        self.samples.push(sample);
        self.metadata.push(metadata);
        self.index += 1;
        if self.index < self.size {
            self.state = BatchState::Running;
            StepOutcome::Progress {
                index: self.index,
                size: self.size,
            }
        } else {
            for sample in &mut self.samples {
                sample.score = Score::Unscored;
            }
            self.state = BatchState::Finished;
            StepOutcome::Finished {
                samples: self.samples.len(),
                persisted: false,
            }
        }
    }

    /// Samples and metadata awaiting persistence.
    pub fn pending(&self) -> (&[Sample], &[Metadata]) {
        (&self.samples, &self.metadata)
    }

    pub fn has_pending(&self) -> bool {
        self.state == BatchState::Finished && !self.samples.is_empty()
    }

    /// Finished → Idle after a successful save.
    pub fn mark_persisted(&mut self) {
        if self.state == BatchState::Finished {
            *self = Self::new();
        }
    }
}
