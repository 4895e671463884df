use dashmap::DashMap;

/// Hands out `prefix-N` names; `N` grows monotonically per prefix, starting at 1.
#[derive(Debug, Default)]
pub struct NameAllocator {
    counters: DashMap<String, u64>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_name(&self, prefix: &str) -> String {
        // The shard lock is held while bumping, so concurrent callers never see the same value.
        let mut counter = self.counters.entry(prefix.to_owned()).or_insert(0);
        *counter += 1;
        format!("{prefix}-{}", *counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn counters_are_per_prefix() {
        let names = NameAllocator::new();
        assert_eq!(names.next_name("flow"), "flow-1");
        assert_eq!(names.next_name("flow"), "flow-2");
        assert_eq!(names.next_name("ingest"), "ingest-1");
        assert_eq!(names.next_name("flow"), "flow-3");
    }

    #[test]
    fn concurrent_allocation_never_collides() {
        let names = Arc::new(NameAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let names = names.clone();
                std::thread::spawn(move || {
                    (0..250).map(|_| names.next_name("flow")).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for name in handle.join().unwrap() {
                assert!(seen.insert(name), "duplicate name allocated");
            }
        }
        assert_eq!(seen.len(), 2000);
        assert!(seen.contains("flow-2000"));
    }
}
