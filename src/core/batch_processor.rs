//! Batch replay with user-based partitioning
//!
//! This module provides the `BatchProcessor`, which replays a batch of
//! operations concurrently while keeping each user's operations in input
//! order.
//!
//! # Design
//!
//! A batch is partitioned by user id. Every partition runs sequentially on
//! its own blocking task (the mutator does synchronous store and lease
//! calls), and partitions of different users run in parallel. Operations of
//! one user never race each other, so the replay result does not depend on
//! scheduling.
//!
//! ```text
//! BatchProcessor
//!     └── Arc<BalanceMutator>  (shared, thread-safe)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use crate::core::mutator::BalanceMutator;
use crate::types::{LedgerError, ReplayOperation, UserId};

/// Result of replaying a single operation
#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub operation: ReplayOperation,
    pub result: Result<(), LedgerError>,
}

/// Batch processor with user-based partitioning
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    mutator: Arc<BalanceMutator>,
}

impl BatchProcessor {
    pub fn new(mutator: Arc<BalanceMutator>) -> Self {
        Self { mutator }
    }

    /// Partition a batch by user id
    ///
    /// Each operation lands in exactly one partition and every partition keeps
    /// the original relative order of its operations.
    pub fn partition_by_user(
        &self,
        batch: Vec<ReplayOperation>,
    ) -> HashMap<UserId, Vec<ReplayOperation>> {
        let mut user_batches: HashMap<UserId, Vec<ReplayOperation>> = HashMap::new();

        for operation in batch {
            user_batches
                .entry(operation.user_id())
                .or_default()
                .push(operation);
        }

        user_batches
    }

    /// Replay one user's operations in order
    ///
    /// Failures are recorded in the results and do not stop the partition.
    pub fn process_user_operations(&self, operations: Vec<ReplayOperation>) -> Vec<ReplayResult> {
        operations
            .into_iter()
            .map(|operation| {
                let result = self.mutator.replay(&operation);
                if let Err(e) = &result {
                    debug!(operation = ?operation, error = %e, "replay operation rejected");
                }
                ReplayResult { operation, result }
            })
            .collect()
    }

    /// Replay a batch, one blocking task per user
    ///
    /// Results of different users may come back in any order.
    pub async fn process_batch(&self, batch: Vec<ReplayOperation>) -> Vec<ReplayResult> {
        let user_batches = self.partition_by_user(batch);

        let mut tasks = Vec::with_capacity(user_batches.len());
        for (_user_id, operations) in user_batches {
            let processor = self.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                processor.process_user_operations(operations)
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            match task.await {
                Ok(user_results) => results.extend(user_results),
                Err(e) => error!(error = %e, "replay task panicked"),
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{CacheLayer, DEFAULT_TTL};
    use crate::core::lock_coordinator::{LockConfig, LockCoordinator};
    use crate::core::memory::{MemoryBalanceStore, MemoryCache, MemoryLeaseStore};
    use crate::types::MutationRequest;

    fn processor() -> BatchProcessor {
        let mutator = BalanceMutator::new(
            Arc::new(MemoryBalanceStore::new()),
            LockCoordinator::new(Arc::new(MemoryLeaseStore::new()), LockConfig::default()),
            CacheLayer::new(Arc::new(MemoryCache::new()), DEFAULT_TTL),
        );
        BatchProcessor::new(Arc::new(mutator))
    }

    fn add(user: UserId, amount: u64) -> ReplayOperation {
        ReplayOperation::Mutate(MutationRequest::add(user, 1, amount))
    }

    #[test]
    fn test_partition_keeps_per_user_order() {
        let batch = vec![
            ReplayOperation::Register { user_id: 1 },
            add(2, 10),
            add(1, 20),
            add(2, 30),
        ];

        let partitions = processor().partition_by_user(batch);

        assert_eq!(partitions.len(), 2);
        assert_eq!(
            partitions[&1],
            vec![ReplayOperation::Register { user_id: 1 }, add(1, 20)]
        );
        assert_eq!(partitions[&2], vec![add(2, 10), add(2, 30)]);
    }

    #[test]
    fn test_user_operations_continue_after_failure() {
        let processor = processor();
        let operations = vec![
            add(1, 10),
            ReplayOperation::Register { user_id: 1 },
            add(1, 10),
        ];

        let results = processor.process_user_operations(operations);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].result, Err(LedgerError::user_not_found(1)));
        assert!(results[1].result.is_ok());
        assert!(results[2].result.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_process_batch_replays_every_operation() {
        let processor = processor();
        let mut batch = Vec::new();
        for user in 1..=8 {
            batch.push(ReplayOperation::Register { user_id: user });
        }
        for round in 0..5 {
            for user in 1..=8 {
                batch.push(add(user, round + 1));
            }
        }

        let results = processor.process_batch(batch).await;

        assert_eq!(results.len(), 48);
        assert!(results.iter().all(|r| r.result.is_ok()));
        let balances = processor.mutator.balances().unwrap();
        assert_eq!(balances.len(), 8);
        assert!(balances.iter().all(|b| b.quantity == 15));
    }

    #[test]
    fn test_processor_can_be_shared_across_threads() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<BatchProcessor>();
    }
}
