//! # Tick Schedule
//!
//! Fixed phases per tick, each a list of systems run in registration order:
//!
//! ```text
//! advance tick -> [replication ingest] -> PreUpdate -> Update -> PostUpdate -> [replication flush]
//! ```
//!
//! Systems receive the [`Store`] by `&mut`; there is no global state.

mod app;
mod tick;

use tether_core::Store;

pub use app::SyncApp;
pub use tick::{TickLoop, TickStats};

/// Where a system runs within a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// After inbound replication has been applied.
    PreUpdate,
    /// Main logic: sensors, control, operator input.
    Update,
    /// After logic, before changes are tracked and flushed.
    PostUpdate,
}

/// A system: any `FnMut(&mut Store)`.
pub type System = Box<dyn FnMut(&mut Store) + Send>;

/// Systems grouped by phase.
#[derive(Default)]
pub struct Schedule {
    pre_update: Vec<System>,
    update: Vec<System>,
    post_update: Vec<System>,
}

impl Schedule {
    /// Creates an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a system to `phase`.
    pub fn add_system<F>(&mut self, phase: Phase, system: F) -> &mut Self
    where
        F: FnMut(&mut Store) + Send + 'static,
    {
        self.systems_mut(phase).push(Box::new(system));
        self
    }

    /// Runs every system of `phase`.
    pub fn run(&mut self, phase: Phase, store: &mut Store) {
        for system in self.systems_mut(phase) {
            system(store);
        }
    }

    /// Number of systems in `phase`.
    #[must_use]
    pub fn len(&self, phase: Phase) -> usize {
        match phase {
            Phase::PreUpdate => self.pre_update.len(),
            Phase::Update => self.update.len(),
            Phase::PostUpdate => self.post_update.len(),
        }
    }

    /// Returns true if no phase has systems.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pre_update.is_empty() && self.update.is_empty() && self.post_update.is_empty()
    }

    fn systems_mut(&mut self, phase: Phase) -> &mut Vec<System> {
        match phase {
            Phase::PreUpdate => &mut self.pre_update,
            Phase::Update => &mut self.update,
            Phase::PostUpdate => &mut self.post_update,
        }
    }
}
