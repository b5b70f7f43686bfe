//! Whole-run driver
//!
//! Owns the single seeded random stream of a run. Every draw (population,
//! compatibility tests, reuse) goes through it in a fixed order, so a run
//! is reproducible from its config alone.

use kpd_types::errors::SimulationError;
use matching_engine::CompatibilityGraph;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::config::SimulationConfig;
use crate::metrics::{PeriodReport, SimulationSummary, WaitTimes};
use crate::population::{poisson, Population};
use crate::scheduler::{Arrivals, PeriodScheduler, SchedulerSettings};

#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    rng: ChaCha8Rng,
    population: Population,
    scheduler: PeriodScheduler,
    waits: WaitTimes,
}

impl Simulation {
    /// Validate the config and seed the start population.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut population = Population::new(&config)?;
        let graph = CompatibilityGraph::new(config.weight_policy());
        let mut scheduler =
            PeriodScheduler::new(graph, config.build_strategy(), SchedulerSettings::from(&config));

        let start = Arrivals {
            pairs: population.initial_pairs(config.start_size, &mut rng),
            altruists: Vec::new(),
        };
        scheduler.admit(start, &mut rng)?;
        info!(
            seed = config.seed,
            pairs = scheduler.graph().pair_count(),
            edges = scheduler.graph().edge_count(),
            strategy = scheduler.strategy_name(),
            "start population admitted"
        );

        Ok(Self {
            config,
            rng,
            population,
            scheduler,
            waits: WaitTimes::new(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &PeriodScheduler {
        &self.scheduler
    }

    /// New pairs and altruists for `period`.
    fn draw_arrivals(&mut self, period: u32) -> Arrivals {
        let count = poisson(&mut self.rng, self.config.arrival_rate) as usize;
        let pairs = self.population.arrivals(count, &mut self.rng);

        let mut altruists = Vec::new();
        if period % self.config.altruist_every == 0 {
            let count = if self.config.random_altruists {
                poisson(&mut self.rng, self.config.altruist_rate)
            } else {
                self.config.altruist_rate.floor() as u32
            };
            for _ in 0..count {
                altruists.push(self.population.altruist(&mut self.rng));
            }
        }
        Arrivals { pairs, altruists }
    }

    /// Run one period and return its report.
    pub fn step(&mut self, period: u32) -> Result<PeriodReport, SimulationError> {
        let arrivals = self.draw_arrivals(period);
        let outcome = self
            .scheduler
            .run_period(period, arrivals, &self.population, &mut self.rng)?;
        self.waits.extend(&outcome.wait_times);
        let last = period + 1 == self.config.num_periods;
        Ok(PeriodReport::new(&outcome, &self.scheduler, &self.waits, last))
    }

    /// Run every configured period.
    pub fn run(mut self) -> Result<SimulationSummary, SimulationError> {
        let mut summary = SimulationSummary::new(self.scheduler.strategy_name());
        for period in 0..self.config.num_periods {
            let report = self.step(period)?;
            summary.record(report);
        }
        summary.waits = self.waits;
        info!(
            periods = summary.periods.len(),
            transplants = summary.total_transplants,
            chain_transplants = summary.tally.chain_transplants,
            altruists = summary.total_altruists,
            "simulation complete"
        );
        Ok(summary)
    }
}
