//! Ordered synchronous fan-out.
//!
//! [`Dispatcher`] holds observers sorted once by ordinal and replays each
//! record onto every one of them on the caller's thread.

use std::sync::Arc;

use reqprobe_core::{by_ordinal, EventRecord, Observer, Operation};

use super::isolation::{deliver, stop};

/// Fans records out to an ordinal-ordered list of observers.
///
/// Ties keep registration order. A panicking observer is reported and
/// skipped; the remaining observers still receive the record.
pub struct Dispatcher<O: Operation> {
    observers: Vec<Arc<dyn Observer<O>>>,
}

impl<O: Operation> Dispatcher<O> {
    /// Creates a dispatcher over `observers`, stably sorted by ordinal.
    #[must_use]
    pub fn new(observers: impl IntoIterator<Item = Arc<dyn Observer<O>>>) -> Self {
        let mut observers: Vec<_> = observers.into_iter().collect();
        observers.sort_by(|a, b| by_ordinal(a.as_ref(), b.as_ref()));
        Self { observers }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Ordinals of the registered observers in delivery order.
    #[must_use]
    pub fn ordinals(&self) -> Vec<i32> {
        self.observers.iter().map(|o| o.ordinal()).collect()
    }

    /// Delivers `record` to every observer in order.
    pub fn dispatch(&self, record: &EventRecord<O>) {
        for observer in &self.observers {
            deliver(observer.as_ref(), record);
        }
    }

    /// Asks every observer to stop background work; `true` if any did.
    ///
    /// A panicking observer is reported and the rest are still asked.
    pub fn shutdown(&self) -> bool {
        self.observers
            .iter()
            .fold(false, |stopped, observer| stop(observer.as_ref()) | stopped)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Op;

    impl Operation for Op {
        fn name(&self) -> &'static str {
            "OP"
        }
    }

    /// Appends `(label, event)` to a shared journal on every callback it handles.
    struct Journaling {
        label: &'static str,
        ordinal: i32,
        journal: Arc<Mutex<Vec<(&'static str, &'static str)>>>,
        stops: bool,
    }

    impl Observer<Op> for Journaling {
        fn on_startup(&self) {
            self.journal.lock().push((self.label, "startup"));
        }

        fn on_shutdown(&self) {
            self.journal.lock().push((self.label, "shutdown"));
        }

        fn ordinal(&self) -> i32 {
            self.ordinal
        }

        fn shutdown(&self) -> bool {
            self.stops
        }
    }

    struct AlwaysPanics;

    impl Observer<Op> for AlwaysPanics {
        fn on_startup(&self) {
            panic!("startup is broken");
        }

        fn on_shutdown(&self) {
            panic!("shutdown is broken");
        }

        fn shutdown(&self) -> bool {
            panic!("cannot stop");
        }

        fn ordinal(&self) -> i32 {
            -1
        }
    }

    fn journaling(
        label: &'static str,
        ordinal: i32,
        journal: &Arc<Mutex<Vec<(&'static str, &'static str)>>>,
    ) -> Arc<dyn Observer<Op>> {
        Arc::new(Journaling {
            label,
            ordinal,
            journal: Arc::clone(journal),
            stops: false,
        })
    }

    #[test]
    fn observers_run_in_ordinal_order_with_stable_ties() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(vec![
            journaling("late", 10, &journal),
            journaling("first-zero", 0, &journal),
            journaling("second-zero", 0, &journal),
            journaling("early", -3, &journal),
        ]);

        assert_eq!(dispatcher.ordinals(), vec![-3, 0, 0, 10]);
        dispatcher.dispatch(&EventRecord::Startup);

        let labels: Vec<_> = journal.lock().iter().map(|(label, _)| *label).collect();
        assert_eq!(labels, vec!["early", "first-zero", "second-zero", "late"]);
    }

    #[test]
    fn panicking_observer_does_not_block_the_next_one() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(vec![
            journaling("healthy", 0, &journal),
            Arc::new(AlwaysPanics) as Arc<dyn Observer<Op>>,
        ]);

        dispatcher.dispatch(&EventRecord::Startup);
        dispatcher.dispatch(&EventRecord::Shutdown);

        assert_eq!(
            *journal.lock(),
            vec![("healthy", "startup"), ("healthy", "shutdown")]
        );
    }

    #[test]
    fn empty_dispatcher_does_nothing() {
        let dispatcher = Dispatcher::<Op>::new(Vec::new());
        assert!(dispatcher.is_empty());
        assert_eq!(dispatcher.len(), 0);
        dispatcher.dispatch(&EventRecord::Startup);
        assert!(!dispatcher.shutdown());
    }

    #[test]
    fn shutdown_reaches_every_observer() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let stopping: Arc<dyn Observer<Op>> = Arc::new(Journaling {
            label: "stopping",
            ordinal: 5,
            journal: Arc::clone(&journal),
            stops: true,
        });
        let dispatcher = Dispatcher::new(vec![stopping, journaling("plain", 0, &journal)]);
        assert!(dispatcher.shutdown());
    }

    #[test]
    fn panicking_shutdown_does_not_skip_later_observers() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let stopping = Arc::new(Journaling {
            label: "stopping",
            ordinal: 5,
            journal: Arc::clone(&journal),
            stops: true,
        });
        let dispatcher = Dispatcher::new(vec![
            Arc::new(AlwaysPanics) as Arc<dyn Observer<Op>>,
            stopping as Arc<dyn Observer<Op>>,
        ]);
        assert_eq!(dispatcher.ordinals(), vec![-1, 5]);
        assert!(dispatcher.shutdown());
    }
}
