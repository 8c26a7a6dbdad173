/// Outcome of comparing one counter sample against the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No prior counter; the sample becomes the baseline
    Baseline,
    /// Counter grew; stall count reset
    Growing,
    /// Counter equal or lower than before, `n` consecutive times
    Stalled(u32),
    /// Stall count reached the threshold; count reset
    Failover,
}

/// Hysteresis for one monitor generation.
///
/// A sample that is equal to or below the stored counter counts as a stall,
/// which also covers counters reset by a rule reinstall.
#[derive(Debug)]
pub struct StallDetector {
    threshold: u32,
    stalls: u32,
}

impl StallDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            stalls: 0,
        }
    }

    pub fn observe(&mut self, prior: Option<u64>, current: u64) -> Verdict {
        match prior {
            None => Verdict::Baseline,
            Some(prior) if current > prior => {
                self.stalls = 0;
                Verdict::Growing
            }
            Some(_) => {
                self.stalls += 1;
                if self.stalls >= self.threshold {
                    self.stalls = 0;
                    Verdict::Failover
                } else {
                    Verdict::Stalled(self.stalls)
                }
            }
        }
    }

    pub fn stalls(&self) -> u32 {
        self.stalls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed samples the way the monitor does: the stored counter only moves
    /// on baseline and growth.
    fn run(threshold: u32, samples: &[u64]) -> Vec<Verdict> {
        let mut detector = StallDetector::new(threshold);
        let mut stored = None;
        samples
            .iter()
            .map(|&current| {
                let verdict = detector.observe(stored, current);
                match verdict {
                    Verdict::Baseline | Verdict::Growing => stored = Some(current),
                    Verdict::Failover => stored = None,
                    Verdict::Stalled(_) => {}
                }
                verdict
            })
            .collect()
    }

    #[test]
    fn flat_counter_fails_over_on_fourth_sample() {
        let verdicts = run(3, &[100, 100, 100, 100]);
        assert_eq!(
            verdicts,
            vec![
                Verdict::Baseline,
                Verdict::Stalled(1),
                Verdict::Stalled(2),
                Verdict::Failover,
            ]
        );
    }

    #[test]
    fn growth_resets_the_stall_count() {
        let mut detector = StallDetector::new(3);
        assert_eq!(detector.observe(None, 100), Verdict::Baseline);
        assert_eq!(detector.observe(Some(100), 100), Verdict::Stalled(1));
        assert_eq!(detector.observe(Some(100), 150), Verdict::Growing);
        assert_eq!(detector.stalls(), 0);
    }

    #[test]
    fn needs_full_threshold_after_a_reset() {
        let verdicts = run(3, &[100, 150, 100, 100, 100]);
        assert_eq!(
            verdicts,
            vec![
                Verdict::Baseline,
                Verdict::Growing,
                Verdict::Stalled(1),
                Verdict::Stalled(2),
                Verdict::Failover,
            ]
        );
    }

    #[test]
    fn regressed_counter_counts_as_stall() {
        let mut detector = StallDetector::new(2);
        assert_eq!(detector.observe(Some(500), 20), Verdict::Stalled(1));
        assert_eq!(detector.observe(Some(500), 40), Verdict::Failover);
        assert_eq!(detector.stalls(), 0);
    }

    #[test]
    fn zero_threshold_behaves_as_one() {
        let mut detector = StallDetector::new(0);
        assert_eq!(detector.observe(Some(1), 1), Verdict::Failover);
    }
}
