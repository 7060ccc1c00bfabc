//! Observer registry and the foreground/background substitution policy.
//!
//! The registry is a small state machine:
//!
//! ```text
//!   Vacant --add--> Interactive --remove last--> Vacant
//!   Vacant --install--> BackgroundOnly --add--> Interactive
//! ```
//!
//! The background observer can only enter a vacant registry, and any
//! interactive observer pushes it out, so the two never coexist.

use std::sync::Arc;

use crate::model::JobOutcome;
use crate::progress::{BackgroundRef, ObserverRef};

/// Which kind of observers the registry currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    /// Nobody is watching
    Vacant,
    /// One or more interactive observers are attached
    Interactive,
    /// Only the background observer is attached
    BackgroundOnly,
}

#[derive(Default)]
enum Occupancy {
    #[default]
    Vacant,
    Interactive(Vec<ObserverRef>),
    Background(BackgroundRef),
}

/// An observer selected to receive an event.
#[derive(Clone)]
pub enum Recipient {
    Interactive(ObserverRef),
    Background(BackgroundRef),
}

impl Recipient {
    pub fn on_progress(&self, current: u64) {
        match self {
            Recipient::Interactive(o) => o.on_progress(current),
            Recipient::Background(o) => o.on_progress(current),
        }
    }

    pub fn on_total(&self, total: u64) {
        match self {
            Recipient::Interactive(o) => o.on_total(total),
            Recipient::Background(o) => o.on_total(total),
        }
    }

    pub fn on_finished(&self, outcome: &JobOutcome) {
        match self {
            Recipient::Interactive(o) => o.on_finished(outcome),
            Recipient::Background(o) => o.on_finished(outcome),
        }
    }
}

/// Ordered set of observers, unique by identity.
#[derive(Default)]
pub struct ObserverRegistry {
    occupancy: Occupancy,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> RegistryMode {
        match self.occupancy {
            Occupancy::Vacant => RegistryMode::Vacant,
            Occupancy::Interactive(_) => RegistryMode::Interactive,
            Occupancy::Background(_) => RegistryMode::BackgroundOnly,
        }
    }

    pub fn len(&self) -> usize {
        match &self.occupancy {
            Occupancy::Vacant => 0,
            Occupancy::Interactive(observers) => observers.len(),
            Occupancy::Background(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, observer: &ObserverRef) -> bool {
        match &self.occupancy {
            Occupancy::Interactive(observers) => observers.iter().any(|o| same(o, observer)),
            _ => false,
        }
    }

    /// Add an interactive observer.
    ///
    /// Adding an observer that is already present changes nothing. If the
    /// background observer was installed it is removed and returned, so the
    /// caller can tell it to stop.
    pub fn add(&mut self, observer: ObserverRef) -> Option<BackgroundRef> {
        match std::mem::take(&mut self.occupancy) {
            Occupancy::Vacant => {
                self.occupancy = Occupancy::Interactive(vec![observer]);
                None
            }
            Occupancy::Interactive(mut observers) => {
                if !observers.iter().any(|o| same(o, &observer)) {
                    observers.push(observer);
                }
                self.occupancy = Occupancy::Interactive(observers);
                None
            }
            Occupancy::Background(background) => {
                self.occupancy = Occupancy::Interactive(vec![observer]);
                Some(background)
            }
        }
    }

    /// Remove an interactive observer. Returns true if it was present.
    pub fn remove(&mut self, observer: &ObserverRef) -> bool {
        let Occupancy::Interactive(observers) = &mut self.occupancy else {
            return false;
        };

        let before = observers.len();
        observers.retain(|o| !same(o, observer));
        let removed = observers.len() != before;

        if observers.is_empty() {
            self.occupancy = Occupancy::Vacant;
        }
        removed
    }

    /// Install the background observer into a vacant registry.
    ///
    /// Returns false, leaving the registry untouched, when it is not vacant.
    pub fn install_background(&mut self, background: BackgroundRef) -> bool {
        if !matches!(self.occupancy, Occupancy::Vacant) {
            return false;
        }
        self.occupancy = Occupancy::Background(background);
        true
    }

    /// Snapshot of the observers an event should go to, in delivery order.
    pub fn recipients(&self) -> Vec<Recipient> {
        match &self.occupancy {
            Occupancy::Vacant => Vec::new(),
            Occupancy::Interactive(observers) => observers
                .iter()
                .cloned()
                .map(Recipient::Interactive)
                .collect(),
            Occupancy::Background(background) => vec![Recipient::Background(background.clone())],
        }
    }
}

/// Identity comparison that ignores trait object metadata.
fn same(a: &ObserverRef, b: &ObserverRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
