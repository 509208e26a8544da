//! One replicated node: store, schedule, replicator and tick loop.

use std::sync::atomic::{AtomicBool, Ordering};

use tether_core::{Store, Tick};
use tracing::{debug, info};

use super::{Phase, Schedule, TickLoop};
use crate::replication::Replicator;
use crate::transport::Transport;

/// Owns everything a node needs and runs it tick by tick.
pub struct SyncApp<T: Transport> {
    store: Store,
    schedule: Schedule,
    replicator: Replicator<T>,
    tick_loop: TickLoop,
}

impl<T: Transport> SyncApp<T> {
    /// Assembles a node. The store should carry the transport's instance id
    /// so the ids it hands out are unique on the link.
    #[must_use]
    pub fn new(store: Store, replicator: Replicator<T>, tick_rate: u32) -> Self {
        if store.instance() != replicator.transport().local_instance() {
            debug!(
                store = %store.instance(),
                transport = %replicator.transport().local_instance(),
                "store and transport instance ids differ"
            );
        }
        Self {
            store,
            schedule: Schedule::new(),
            replicator,
            tick_loop: TickLoop::new(tick_rate),
        }
    }

    /// Registers a system.
    pub fn add_system<F>(&mut self, phase: Phase, system: F) -> &mut Self
    where
        F: FnMut(&mut Store) + Send + 'static,
    {
        self.schedule.add_system(phase, system);
        self
    }

    /// The store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The store, for setup and tests.
    #[inline]
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// The replicator.
    #[inline]
    #[must_use]
    pub fn replicator(&self) -> &Replicator<T> {
        &self.replicator
    }

    /// The replicator, for connects, disconnects and events.
    #[inline]
    pub fn replicator_mut(&mut self) -> &mut Replicator<T> {
        &mut self.replicator
    }

    /// The tick loop, for timing statistics.
    #[inline]
    #[must_use]
    pub fn tick_loop(&self) -> &TickLoop {
        &self.tick_loop
    }

    /// Runs one tick immediately. Returns the new tick.
    pub fn tick(&mut self) -> Tick {
        let tick = self.store.advance_tick();
        self.replicator.pre_update(&mut self.store);
        self.schedule.run(Phase::PreUpdate, &mut self.store);
        self.schedule.run(Phase::Update, &mut self.store);
        self.schedule.run(Phase::PostUpdate, &mut self.store);
        self.replicator.post_update(&mut self.store);
        tick
    }

    /// Runs `ticks` ticks at the configured rate.
    pub fn run_for(&mut self, ticks: u64) {
        let target = self.tick_loop.tick_count() + ticks;
        while self.tick_loop.tick_count() < target {
            self.step_realtime();
        }
    }

    /// Runs at the configured rate until `stop` is set.
    pub fn run_until(&mut self, stop: &AtomicBool) {
        info!(
            tick_us = self.tick_loop.tick_duration().as_micros() as u64,
            "tick loop running"
        );
        while !stop.load(Ordering::Relaxed) {
            self.step_realtime();
        }
        let stats = self.tick_loop.stats();
        info!(
            ticks = stats.total_ticks,
            late = stats.late_ticks,
            avg_us = stats.avg_tick_us,
            max_us = stats.max_tick_us,
            "tick loop stopped"
        );
    }

    fn step_realtime(&mut self) {
        if self.tick_loop.should_tick() {
            let start = self.tick_loop.begin_tick();
            self.tick();
            self.tick_loop.end_tick(start);
        } else {
            self.tick_loop.wait_for_next_tick();
        }
    }
}
