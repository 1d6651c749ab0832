//! Convergence polling for slowly-settling scalar readings.
//!
//! The laser reports its resonator position in a status line while tuning.
//! The position creeps toward the target and is declared stable once two
//! consecutive valid readings agree. Readings are noisy: lines without a
//! parsable position, and non-positive positions, are transient garbage and
//! must not reset progress.
//!
//! The decision logic is a pure state machine ([`ConvergenceState`]) so it
//! can be tested without I/O or timers; [`wait_for_stable`] drives it against
//! a live [`InstrumentLink`] with a poll interval, a miss budget, and a
//! cancellation signal.

use crate::error::{GatewayError, GatewayResult};
use crate::link::{protocol, InstrumentLink};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Outcome of feeding one reading into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The reading equalled the previous valid reading.
    Converged(i64),
    /// Not settled yet; keep polling.
    Pending,
}

/// Accumulated convergence progress: the comparison baseline and the miss
/// count. Misses are cumulative and never reset, so a budget on them bounds
/// the whole wait.
#[derive(Debug, Default)]
pub struct ConvergenceState {
    last_valid: Option<i64>,
    misses: u32,
}

impl ConvergenceState {
    /// Fresh state with no baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one reading. `None` (unparsable) and non-positive values count
    /// as misses and leave the baseline untouched; a positive value either
    /// matches the baseline (convergence) or becomes the new baseline.
    pub fn observe(&mut self, reading: Option<i64>) -> Step {
        match reading {
            Some(value) if value > 0 => {
                if self.last_valid == Some(value) {
                    Step::Converged(value)
                } else {
                    self.last_valid = Some(value);
                    Step::Pending
                }
            }
            _ => {
                self.misses += 1;
                Step::Pending
            }
        }
    }

    /// Misses observed so far.
    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// The current comparison baseline, if any valid reading arrived yet.
    pub fn last_valid(&self) -> Option<i64> {
        self.last_valid
    }
}

/// A completed convergence wait: the stable value and how many misses it
/// took to get there (reported for observability).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convergence {
    pub value: i64,
    pub misses: u32,
}

/// Poll `query` over `link` until the extracted reading stabilises.
///
/// Fails with `ConvergenceTimeout` once misses exceed `max_misses`, carrying
/// the last valid value observed. The wait aborts early (with `SessionGone`)
/// when `cancel` flips to true, so a disconnect does not have to ride out the
/// poll sleep.
pub async fn wait_for_stable(
    link: &mut dyn InstrumentLink,
    query: &str,
    poll_interval: Duration,
    max_misses: u32,
    cancel: &mut watch::Receiver<bool>,
) -> GatewayResult<Convergence> {
    let mut state = ConvergenceState::new();

    loop {
        if *cancel.borrow() {
            return Err(GatewayError::SessionGone(
                "convergence wait cancelled".to_string(),
            ));
        }

        let line = link.send(query).await?;
        let reading = protocol::extract_resonator(&line);
        trace!(?reading, misses = state.misses(), "convergence poll");

        match state.observe(reading) {
            Step::Converged(value) => {
                debug!(value, misses = state.misses(), "reading converged");
                return Ok(Convergence {
                    value,
                    misses: state.misses(),
                });
            }
            Step::Pending => {
                if state.misses() > max_misses {
                    return Err(GatewayError::ConvergenceTimeout {
                        misses: state.misses(),
                        last: state.last_valid(),
                    });
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            changed = cancel.changed() => {
                if changed.is_ok() && *cancel.borrow() {
                    return Err(GatewayError::SessionGone(
                        "convergence wait cancelled".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{MockLink, MockLinkLog, MockReply};

    #[test]
    fn canonical_sequence_converges_after_one_miss() {
        // First reading is garbage, then the first positive value repeats.
        let mut state = ConvergenceState::new();
        assert_eq!(state.observe(Some(-2)), Step::Pending);
        assert_eq!(state.observe(Some(5)), Step::Pending);
        assert_eq!(state.observe(Some(5)), Step::Converged(5));
        assert_eq!(state.misses(), 1);
    }

    #[test]
    fn noise_never_updates_baseline() {
        let mut state = ConvergenceState::new();
        state.observe(None);
        state.observe(Some(0));
        state.observe(Some(-7));
        assert_eq!(state.last_valid(), None);
        assert_eq!(state.misses(), 3);
    }

    #[test]
    fn changing_values_track_latest_baseline() {
        let mut state = ConvergenceState::new();
        assert_eq!(state.observe(Some(10)), Step::Pending);
        assert_eq!(state.observe(Some(12)), Step::Pending);
        assert_eq!(state.observe(Some(14)), Step::Pending);
        assert_eq!(state.observe(Some(14)), Step::Converged(14));
        assert_eq!(state.misses(), 0);
    }

    #[tokio::test]
    async fn wait_returns_value_and_miss_count() {
        let log = MockLinkLog::default();
        let mut link = MockLink::new(
            vec![
                MockReply::line("Resonator: -2"),
                MockReply::line("Resonator: 5"),
                MockReply::line("Resonator: 5"),
            ],
            log,
        );
        let (_tx, mut cancel) = watch::channel(false);

        let result = wait_for_stable(
            &mut link,
            protocol::CMD_STATUS,
            Duration::from_millis(1),
            5,
            &mut cancel,
        )
        .await
        .unwrap();

        assert_eq!(result, Convergence { value: 5, misses: 1 });
    }

    #[tokio::test]
    async fn all_noise_exhausts_miss_budget() {
        let log = MockLinkLog::default();
        let replies = (0..5)
            .map(|_| MockReply::line("Etalon: warming up"))
            .collect();
        let mut link = MockLink::new(replies, log);
        let (_tx, mut cancel) = watch::channel(false);

        let err = wait_for_stable(
            &mut link,
            protocol::CMD_STATUS,
            Duration::from_millis(1),
            2,
            &mut cancel,
        )
        .await
        .unwrap_err();

        match err {
            GatewayError::ConvergenceTimeout { misses, last } => {
                assert_eq!(misses, 3);
                assert_eq!(last, None);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let log = MockLinkLog::default();
        // Endless pending readings; only cancellation can end this wait.
        let replies = (0..1000)
            .map(|i| MockReply::line(format!("Resonator: {}", i + 1)))
            .collect();
        let mut link = MockLink::new(replies, log);
        let (tx, mut cancel) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });

        let err = wait_for_stable(
            &mut link,
            protocol::CMD_STATUS,
            Duration::from_millis(5),
            u32::MAX,
            &mut cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, GatewayError::SessionGone(_)));
    }
}
