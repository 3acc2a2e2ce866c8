//! Evaluation Feedback Blocks
//!
//! Every arbitrage iteration and multipath run narrates what it saw and why
//! it did or did not trade. The lines are bundled per evaluation so parallel
//! workers do not interleave their stories, then flushed through the logger
//! in one piece. Escalated blocks go to the error level, which the embedding
//! process routes to its alert channel.

use log::{error, info};

#[derive(Debug)]
pub struct Feedback {
    title: String,
    lines: Vec<String>,
    escalated: bool,
    flushed: bool,
}

impl Feedback {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lines: Vec::new(),
            escalated: false,
            flushed: false,
        }
    }

    pub fn add(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Routes this block to the alert channel when flushed.
    pub fn escalate(&mut self) {
        self.escalated = true;
    }

    /// Takes a previously escalated block off the alert channel again, for
    /// outcomes that turned out to be unremarkable.
    pub fn deescalate(&mut self) {
        self.escalated = false;
    }

    /// Drops the collected lines; an evaluation with nothing to say stays
    /// silent rather than flooding the logbook.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Folds another block into this one, keeping the lines bundled when a
    /// fan-out (parallel follow-ups, say) narrated into its own block.
    pub fn merge(&mut self, mut other: Feedback) {
        if other.escalated {
            self.escalated = true;
        }
        self.lines.append(&mut other.lines);
        other.flushed = true;
    }

    pub fn flush(&mut self) {
        self.flushed = true;
        if self.lines.is_empty() {
            return;
        }
        if self.escalated {
            error!("{}", self.title);
            for line in self.lines.drain(..) {
                error!("  {}", line);
            }
        } else {
            info!("{}", self.title);
            for line in self.lines.drain(..) {
                info!("  {}", line);
            }
        }
    }
}

impl Drop for Feedback {
    fn drop(&mut self) {
        if !self.flushed {
            self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_blocks_stay_silent() {
        let mut feedback = Feedback::new("Arbitrage dogecoin @ bitcoin");
        feedback.add("no favourable deal");
        feedback.clear();
        assert!(feedback.is_empty());
        feedback.flush();
    }

    #[test]
    fn escalation_can_be_withdrawn() {
        let mut feedback = Feedback::new("Executing multipath");
        feedback.escalate();
        feedback.deescalate();
        feedback.add("path is unprofitable");
        assert!(!feedback.escalated);
    }
}
