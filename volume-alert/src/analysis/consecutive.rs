use crate::{alert::ConsecutiveAlert, candle::Candle};
use chrono::{DateTime, Utc};

/// Per-instrument run of consecutive bullish closed candles.
///
/// Fires once per new high-water mark: with threshold 3 a run reaching 3, 4 & 5 fires at each
/// count, never twice at the same count. A non-bullish close resets both the run & the mark.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct ConsecutiveRun {
    count: u32,
    last_alert_count: u32,
}

impl ConsecutiveRun {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_alert_count(&self) -> u32 {
        self.last_alert_count
    }

    /// Run has reached the threshold, spike alerts coinciding with it are escalated.
    pub fn is_active(&self, threshold: u32) -> bool {
        self.count >= threshold
    }

    /// Advance the run with one settled candle, returning the count if a new mark was reached.
    pub fn advance(&mut self, is_bullish: bool, threshold: u32) -> Option<u32> {
        if !is_bullish {
            self.count = 0;
            self.last_alert_count = 0;
            return None;
        }

        self.count += 1;
        if self.count >= threshold && self.count > self.last_alert_count {
            self.last_alert_count = self.count;
            Some(self.count)
        } else {
            None
        }
    }

    /// [`Self::advance`] with a closed candle, building the [`ConsecutiveAlert`] on fire.
    pub fn evaluate(
        &mut self,
        candle: &Candle,
        now: DateTime<Utc>,
        threshold: u32,
    ) -> Option<ConsecutiveAlert> {
        self.advance(candle.is_bullish(), threshold).map(|count| {
            ConsecutiveAlert::new(
                candle.instrument.clone(),
                count,
                candle.start_time,
                now,
                format!("{count} consecutive bullish candles"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use smol_str::SmolStr;

    #[test]
    fn test_advance_fires_at_each_new_mark() {
        let mut run = ConsecutiveRun::default();

        let fired = (0..6)
            .filter_map(|_| run.advance(true, 3))
            .collect::<Vec<_>>();

        assert_eq!(fired, vec![3, 4, 5, 6]);
        assert_eq!(run.last_alert_count(), 6);
    }

    #[test]
    fn test_advance_sequences() {
        struct TestCase {
            input: Vec<bool>,
            expected: Vec<Option<u32>>,
        }

        let tests = vec![
            TestCase {
                // TC0: run broken before threshold never fires
                input: vec![true, true, false, true, true],
                expected: vec![None, None, None, None, None],
            },
            TestCase {
                // TC1: reset re-enables firing at the threshold on a fresh run
                input: vec![true, true, true, false, true, true, true],
                expected: vec![None, None, Some(3), None, None, None, Some(3)],
            },
            TestCase {
                // TC2: bearish candles alone never fire
                input: vec![false, false, false],
                expected: vec![None, None, None],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut run = ConsecutiveRun::default();
            let actual = test
                .input
                .into_iter()
                .map(|is_bullish| run.advance(is_bullish, 3))
                .collect::<Vec<_>>();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_reset_clears_mark() {
        let mut run = ConsecutiveRun::default();
        (0..4).for_each(|_| {
            run.advance(true, 3);
        });
        assert!(run.is_active(3));

        run.advance(false, 3);
        assert_eq!(run.count(), 0);
        assert_eq!(run.last_alert_count(), 0);
        assert!(!run.is_active(3));
    }

    #[test]
    fn test_evaluate_builds_alert() {
        let start_time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let candle = Candle {
            instrument: SmolStr::new("XUSDT"),
            start_time,
            end_time: start_time + Duration::seconds(60),
            open: dec!(1),
            high: dec!(1.2),
            low: dec!(1),
            close: dec!(1.1),
            volume: dec!(10),
        };
        let now = start_time + Duration::seconds(59);

        let mut run = ConsecutiveRun::default();
        assert!(run.evaluate(&candle, now, 2).is_none());

        let alert = run.evaluate(&candle, now, 2).unwrap();
        assert_eq!(alert.instrument, "XUSDT");
        assert_eq!(alert.consecutive_count, 2);
        assert_eq!(alert.candle_start_time, start_time);
        assert_eq!(alert.time, now);
    }
}
