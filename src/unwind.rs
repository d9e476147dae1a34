//! Ordered release obligations.
//!
//! Each successful acquisition pushes the action that undoes it. Discharging
//! the stack runs those actions newest first, so resources always go back in
//! exact reverse order of acquisition, whether the stack is discharged after
//! a failed load or at unload.

use tracing::debug;

type Release = Box<dyn FnOnce() + Send>;

/// Stack of pending release actions.
#[derive(Default)]
pub struct UnwindStack {
    entries: Vec<(&'static str, Release)>,
}

impl UnwindStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how to undo the acquisition just made.
    pub fn push(&mut self, label: &'static str, release: impl FnOnce() + Send + 'static) {
        self.entries.push((label, Box::new(release)));
    }

    /// Number of pending obligations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels of pending obligations, oldest first.
    pub fn labels(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(label, _)| *label).collect()
    }

    /// Run every obligation, newest first. Returns the labels in the order
    /// they ran.
    pub fn discharge(&mut self) -> Vec<&'static str> {
        let mut ran = Vec::with_capacity(self.entries.len());
        while let Some((label, release)) = self.entries.pop() {
            debug!(step = label, "Releasing");
            release();
            ran.push(label);
        }
        ran
    }
}

impl Drop for UnwindStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            self.discharge();
        }
    }
}

impl std::fmt::Debug for UnwindStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnwindStack")
            .field("pending", &self.labels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_discharge_runs_in_reverse() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = UnwindStack::new();
        for label in ["a", "b", "c"] {
            let order = order.clone();
            stack.push(label, move || order.lock().push(label));
        }

        assert_eq!(stack.discharge(), vec!["c", "b", "a"]);
        assert_eq!(*order.lock(), vec!["c", "b", "a"]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_drop_discharges_pending() {
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let mut stack = UnwindStack::new();
            let o = order.clone();
            stack.push("first", move || o.lock().push(1));
            let o = order.clone();
            stack.push("second", move || o.lock().push(2));
        }
        assert_eq!(*order.lock(), vec![2, 1]);
    }
}
