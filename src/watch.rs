//! Port arrival and removal, by polling the OS port list.

use std::collections::BTreeSet;

use crate::port::PortProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortChange {
    Arrived(String),
    Removed(String),
}

#[derive(Debug, Default)]
pub struct PortWatcher {
    known: BTreeSet<String>,
}

impl PortWatcher {
    /// Starts from `initial` so ports present at start-up are not reported.
    pub fn new(initial: impl IntoIterator<Item = String>) -> Self {
        Self {
            known: initial.into_iter().collect(),
        }
    }

    pub fn known(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }

    /// Diff `current` against the last list seen. Removals come first.
    pub fn update(&mut self, current: Vec<String>) -> Vec<PortChange> {
        let current: BTreeSet<String> = current.into_iter().collect();
        let mut changes: Vec<PortChange> = self
            .known
            .difference(&current)
            .cloned()
            .map(PortChange::Removed)
            .collect();
        changes.extend(current.difference(&self.known).cloned().map(PortChange::Arrived));
        self.known = current;
        changes
    }

    /// Ask `provider` for the current list and diff it. An enumeration error
    /// is logged and reports no change.
    pub fn poll(&mut self, provider: &dyn PortProvider) -> Vec<PortChange> {
        match provider.available_ports() {
            Ok(ports) => self.update(ports),
            Err(e) => {
                tracing::debug!("port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }
}
