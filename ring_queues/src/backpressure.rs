//! Full-ring backpressure with hysteresis.
//!
//! A submission is refused outright once free slots drop below the
//! worst-case need of one packet, and stays refused until a reap raises
//! availability above a strictly higher resume threshold. The gap between
//! the two thresholds keeps the queue from flapping stop/resume on every
//! packet when it runs near full.

use crate::Error;

#[derive(Debug)]
pub struct QueueBackpressure {
    stop_threshold: u16,
    resume_threshold: u16,
    stopped: bool,
}

impl QueueBackpressure {
    pub fn new(stop_threshold: u16, resume_threshold: u16) -> Result<QueueBackpressure, Error> {
        if stop_threshold == 0 || resume_threshold <= stop_threshold {
            return Err(Error::InvalidConfig);
        }
        Ok(QueueBackpressure {
            stop_threshold,
            resume_threshold,
            stopped: false,
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Called after every successful publish with the new availability.
    /// Returns true when this publish is the one that stopped the queue.
    pub fn after_publish(&mut self, available: u16) -> bool {
        if !self.stopped && available < self.stop_threshold {
            self.stopped = true;
            true
        } else {
            false
        }
    }

    /// Called after every reap pass with the new availability.
    /// Returns true when this reap is the one that resumed the queue.
    pub fn after_reap(&mut self, available: u16) -> bool {
        if self.stopped && available > self.resume_threshold {
            self.stopped = false;
            true
        } else {
            false
        }
    }

    /// Forgets a stop, for ring teardown/rebuild.
    pub fn reset(&mut self) {
        self.stopped = false;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_must_leave_a_gap() {
        assert!(QueueBackpressure::new(4, 8).is_ok());
        assert_eq!(QueueBackpressure::new(4, 4).unwrap_err(), Error::InvalidConfig);
        assert_eq!(QueueBackpressure::new(4, 3).unwrap_err(), Error::InvalidConfig);
        assert_eq!(QueueBackpressure::new(0, 4).unwrap_err(), Error::InvalidConfig);
    }

    #[test]
    fn hysteresis_band_does_not_flap() {
        let mut bp = QueueBackpressure::new(4, 8).unwrap();
        assert!(!bp.after_publish(4)); // at the threshold, still open
        assert!(bp.after_publish(3));  // below it, stop fires once
        assert!(!bp.after_publish(2)); // already stopped, no second event
        assert!(bp.is_stopped());

        // Inside the band, the stop holds.
        assert!(!bp.after_reap(5));
        assert!(!bp.after_reap(8));
        assert!(bp.is_stopped());

        assert!(bp.after_reap(9));
        assert!(!bp.is_stopped());
        assert!(!bp.after_reap(10)); // resume fires once
    }
}
