//! Interrupt moderation.
//!
//! Hardware does the time-based half of coalescing through its own
//! registers; the software half decides which transmit descriptors carry
//! the interrupt-request bit (one per `frames` completions) and owns the
//! mask/unmask discipline around a poll pass: unmask exactly once, only
//! after a pass that drained its backlog, and only after every index
//! update is globally visible.

use core::sync::atomic::{fence, Ordering};

use ring_device::CoalesceConfig;

use crate::PollOutcome;

pub struct InterruptModerator {
    config: CoalesceConfig,
    frames_since_irq: u32,
    masked: bool,
}

impl InterruptModerator {
    pub fn new(config: CoalesceConfig) -> InterruptModerator {
        InterruptModerator {
            config,
            frames_since_irq: 0,
            masked: false,
        }
    }

    pub fn config(&self) -> CoalesceConfig {
        self.config
    }

    pub fn set_config(&mut self, config: CoalesceConfig) {
        self.config = config;
        self.frames_since_irq = 0;
    }

    /// Decides whether this frame's last descriptor requests an interrupt.
    /// With `frames == 0` every frame requests one and any delay is left to
    /// the hardware timer.
    pub fn should_request_irq(&mut self) -> bool {
        let threshold = if self.config.frames == 0 { 1 } else { self.config.frames };
        self.frames_since_irq += 1;
        if self.frames_since_irq >= threshold {
            self.frames_since_irq = 0;
            true
        } else {
            false
        }
    }

    /// Records that the event source was masked on entry to a poll pass.
    pub fn note_masked(&mut self) {
        self.masked = true;
    }

    /// Ends a poll pass. On `Complete`, unmasks once; the fence orders the
    /// consumer-index updates before the unmask so a completion racing in
    /// right now still raises a fresh interrupt. On `MoreWork` the source
    /// stays masked and the caller chains another pass.
    pub fn on_poll_complete(&mut self, outcome: PollOutcome, unmask: impl FnOnce()) {
        if let PollOutcome::Complete = outcome {
            if self.masked {
                fence(Ordering::Release);
                unmask();
                self.masked = false;
            }
        }
    }
}
