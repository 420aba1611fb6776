//! Lock-free multi-producer event stack.
//!
//! Producers push onto the head with a read-copy-update loop; the single
//! consumer detaches the whole chain in one swap and reverses it back into
//! submission order.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use reqprobe_core::{EventRecord, Operation};

struct Node<O: Operation> {
    record: Arc<EventRecord<O>>,
    prev: Option<Arc<Node<O>>>,
}

impl<O: Operation> Drop for Node<O> {
    // Unlink iteratively; recursive drop of a long chain would overflow the stack.
    fn drop(&mut self) {
        let mut prev = self.prev.take();
        while let Some(node) = prev {
            match Arc::try_unwrap(node) {
                Ok(mut node) => prev = node.prev.take(),
                Err(_) => break,
            }
        }
    }
}

/// Treiber stack of pending records, newest on top.
pub struct EventStack<O: Operation> {
    head: ArcSwapOption<Node<O>>,
}

impl<O: Operation> EventStack<O> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: ArcSwapOption::empty(),
        }
    }

    /// Pushes `record`. Returns `true` if the stack was empty beforehand,
    /// i.e. the caller is responsible for waking the consumer.
    pub fn push(&self, record: Arc<EventRecord<O>>) -> bool {
        let previous = self.head.rcu(|head| {
            Some(Arc::new(Node {
                record: Arc::clone(&record),
                prev: head.clone(),
            }))
        });
        previous.is_none()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load().is_none()
    }

    /// Detaches everything pushed so far and appends it to `out`, oldest
    /// first. Returns `false` if there was nothing to drain.
    pub fn drain_into(&self, out: &mut VecDeque<Arc<EventRecord<O>>>) -> bool {
        let Some(head) = self.head.swap(None) else {
            return false;
        };
        let mut batch = Vec::new();
        let mut cursor = Some(&head);
        while let Some(node) = cursor {
            batch.push(Arc::clone(&node.record));
            cursor = node.prev.as_ref();
        }
        out.extend(batch.into_iter().rev());
        true
    }
}

impl<O: Operation> Default for EventStack<O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Op;

    impl Operation for Op {
        fn name(&self) -> &'static str {
            "OP"
        }
    }

    fn named(i: usize) -> Arc<EventRecord<Op>> {
        Arc::new(EventRecord::Event {
            op: None,
            name: i.to_string(),
            payload: None,
        })
    }

    fn names(records: &VecDeque<Arc<EventRecord<Op>>>) -> Vec<String> {
        records
            .iter()
            .map(|r| match r.as_ref() {
                EventRecord::Event { name, .. } => name.clone(),
                other => panic!("unexpected record {}", other.kind()),
            })
            .collect()
    }

    #[test]
    fn first_push_reports_empty() {
        let stack = EventStack::new();
        assert!(stack.is_empty());
        assert!(stack.push(named(0)));
        assert!(!stack.push(named(1)));
        assert!(!stack.is_empty());
    }

    #[test]
    fn drain_on_empty_stack_returns_false() {
        let stack = EventStack::<Op>::new();
        let mut out = VecDeque::new();
        assert!(!stack.drain_into(&mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn successive_drains_append_in_submission_order() {
        let stack = EventStack::new();
        let mut out = VecDeque::new();

        stack.push(named(0));
        stack.push(named(1));
        assert!(stack.drain_into(&mut out));
        assert!(stack.is_empty());

        // A push after a drain starts a fresh chain.
        assert!(stack.push(named(2)));
        stack.push(named(3));
        assert!(stack.drain_into(&mut out));

        assert_eq!(names(&out), vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn long_chain_drops_without_overflow() {
        let stack = EventStack::new();
        for i in 0..200_000 {
            stack.push(named(i));
        }
        drop(stack);
    }

    #[test]
    fn concurrent_pushes_are_all_drained() {
        let stack = Arc::new(EventStack::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    for i in 0..1_000 {
                        stack.push(named(t * 1_000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut out = VecDeque::new();
        stack.drain_into(&mut out);
        let mut seen: Vec<usize> = names(&out).iter().map(|n| n.parse().unwrap()).collect();
        assert_eq!(seen.len(), 4_000);

        // Per-producer order survives the merge.
        for t in 0..4 {
            let own: Vec<usize> = seen
                .iter()
                .copied()
                .filter(|n| n / 1_000 == t)
                .collect();
            assert!(own.windows(2).all(|w| w[0] < w[1]));
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 4_000);
    }

    proptest! {
        #[test]
        fn interleaved_drains_preserve_order(batches in proptest::collection::vec(0_usize..20, 1..10)) {
            let stack = EventStack::new();
            let mut out = VecDeque::new();
            let mut next = 0;
            for size in batches {
                for _ in 0..size {
                    stack.push(named(next));
                    next += 1;
                }
                stack.drain_into(&mut out);
            }
            let expected: Vec<String> = (0..next).map(|i| i.to_string()).collect();
            prop_assert_eq!(names(&out), expected);
        }
    }
}
