//! Per-period and whole-run metrics
//!
//! Tracks match counts by cycle and chain length, wait times, altruist
//! usage and the market composition after every period.

use kpd_types::match_result::CycleChainTally;
use serde::{Deserialize, Serialize};

use crate::composition::{Composition, ShareTable};
use crate::scheduler::{PeriodOutcome, PeriodScheduler};

/// Wait times of every transplanted recipient so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitTimes {
    samples: Vec<u32>,
    total: u64,
}

impl WaitTimes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, wait: u32) {
        self.samples.push(wait);
        self.total += u64::from(wait);
    }

    pub fn extend(&mut self, waits: &[u32]) {
        for wait in waits {
            self.record(*wait);
        }
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Median wait; the mean of the two middle samples for an even count,
    /// zero when nothing was recorded.
    pub fn median(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (f64::from(sorted[mid - 1]) + f64::from(sorted[mid])) / 2.0
        } else {
            f64::from(sorted[mid])
        }
    }
}

/// Aggregates reported after one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReport {
    pub period: u32,
    /// Participants (both halves counted) in the market after admission
    pub participants: usize,
    pub pairs_added: usize,
    pub altruists_added: usize,
    pub altruists_in_market: usize,
    pub altruists_used: usize,
    pub perished: usize,
    pub matching_failed: bool,
    pub tally: CycleChainTally,
    pub transplants: usize,
    pub cumulative_wait: u64,
    pub median_wait: f64,
    /// Sum of time in market of unmatched recipients, last period only
    pub remaining_unmatched_time: Option<u64>,
    pub composition: Composition,
}

impl PeriodReport {
    pub fn new(outcome: &PeriodOutcome, scheduler: &PeriodScheduler, waits: &WaitTimes, last: bool) -> Self {
        let graph = scheduler.graph();
        let remaining_unmatched_time = last.then(|| {
            graph
                .participants()
                .filter(|p| p.is_recipient())
                .map(|p| u64::from(p.time_in_market))
                .sum()
        });
        Self {
            period: outcome.period,
            participants: graph.participant_count(),
            pairs_added: outcome.pairs_added,
            altruists_added: outcome.altruists_added,
            altruists_in_market: graph.altruists().len(),
            altruists_used: outcome.matching.altruists_used(),
            perished: outcome.perished,
            matching_failed: outcome.matching_failed,
            tally: outcome.matching.tally.clone(),
            transplants: outcome.matching.transplant_count(),
            cumulative_wait: waits.total(),
            median_wait: waits.median(),
            remaining_unmatched_time,
            composition: scheduler.composition().clone(),
        }
    }
}

/// Totals over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub strategy: String,
    pub periods: Vec<PeriodReport>,
    pub tally: CycleChainTally,
    pub total_transplants: u64,
    pub total_altruists: u64,
    pub total_perished: u64,
    pub failed_periods: u32,
    pub waits: WaitTimes,
    /// Composition shares after the first period
    pub initial_shares: ShareTable,
    /// Composition shares after the last period
    pub final_shares: ShareTable,
}

impl SimulationSummary {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, report: PeriodReport) {
        if self.periods.is_empty() {
            self.initial_shares = report.composition.shares();
        }
        self.final_shares = report.composition.shares();
        self.tally.merge(&report.tally);
        self.total_transplants += report.transplants as u64;
        self.total_altruists += report.altruists_added as u64;
        self.total_perished += report.perished as u64;
        if report.matching_failed {
            self.failed_periods += 1;
        }
        self.periods.push(report);
    }

    /// Fraction of transplants performed inside chains.
    pub fn chain_share(&self) -> f64 {
        if self.total_transplants == 0 {
            return 0.0;
        }
        self.tally.chain_transplants as f64 / self.total_transplants as f64
    }

    /// Human-readable summary string.
    pub fn summary(&self) -> String {
        let cycles = &self.tally.cycles_by_length;
        format!(
            "Strategy: {} | Periods: {} | Transplants: {} | Cycles 2/3/4/5/6+: {}/{}/{}/{}/{} | \
             Chain transplants: {} ({:.1}%) | Altruists: {} | Perished: {} | Failed periods: {} | \
             Median wait: {:.1}",
            self.strategy,
            self.periods.len(),
            self.total_transplants,
            cycles[0],
            cycles[1],
            cycles[2],
            cycles[3],
            cycles[4],
            self.tally.chain_transplants,
            self.chain_share() * 100.0,
            self.total_altruists,
            self.total_perished,
            self.failed_periods,
            self.waits.median(),
        )
    }
}
