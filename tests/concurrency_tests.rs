//! Concurrency and failure-injection tests for the balance mutator
//!
//! These tests hammer a single user's balance from many threads and inject
//! failing backends to check that:
//! - at most one critical section per user runs at a time
//! - no update is lost and balances never go negative
//! - the ledger always sums to the balance
//! - leases are released on every failure path
//! - cache failures never fail a mutation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use currency_ledger::core::cache::{CacheLayer, DEFAULT_TTL};
use currency_ledger::core::lock_coordinator::{LockConfig, LockCoordinator, LockScope};
use currency_ledger::core::memory::{MemoryBalanceStore, MemoryCache, MemoryLeaseStore};
use currency_ledger::core::traits::{BalanceStore, CacheBackend};
use currency_ledger::core::BalanceMutator;
use currency_ledger::types::{
    BackendError, Balance, BalanceChange, CommitReceipt, CurrencyId, LedgerEntry, LedgerError,
    MutationOutcome, MutationRequest, UserId,
};
use rstest::rstest;

/// Balance store that tracks how many critical sections overlap
///
/// A critical section starts at the user check and ends after the commit.
#[derive(Debug, Default)]
struct OverlapTrackingStore {
    inner: MemoryBalanceStore,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl BalanceStore for OverlapTrackingStore {
    fn register_user(&self, user_id: UserId) -> Result<(), BackendError> {
        self.inner.register_user(user_id)
    }

    fn user_exists(&self, user_id: UserId) -> Result<bool, BackendError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        // Widen the window so overlapping sections would be observed
        thread::sleep(Duration::from_micros(200));
        self.inner.user_exists(user_id)
    }

    fn load_balance(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Option<Balance>, BackendError> {
        self.inner.load_balance(user_id, currency_id)
    }

    fn commit(&self, change: &BalanceChange) -> Result<CommitReceipt, BackendError> {
        let result = self.inner.commit(change);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn ledger_entries(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Vec<LedgerEntry>, BackendError> {
        self.inner.ledger_entries(user_id, currency_id)
    }

    fn all_balances(&self) -> Result<Vec<Balance>, BackendError> {
        self.inner.all_balances()
    }
}

/// Balance store whose commits always fail
#[derive(Debug, Default)]
struct FailingCommitStore {
    inner: MemoryBalanceStore,
}

impl BalanceStore for FailingCommitStore {
    fn register_user(&self, user_id: UserId) -> Result<(), BackendError> {
        self.inner.register_user(user_id)
    }

    fn user_exists(&self, user_id: UserId) -> Result<bool, BackendError> {
        self.inner.user_exists(user_id)
    }

    fn load_balance(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Option<Balance>, BackendError> {
        self.inner.load_balance(user_id, currency_id)
    }

    fn commit(&self, _change: &BalanceChange) -> Result<CommitReceipt, BackendError> {
        Err(BackendError::unavailable("memory", "injected commit failure"))
    }

    fn ledger_entries(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Vec<LedgerEntry>, BackendError> {
        self.inner.ledger_entries(user_id, currency_id)
    }

    fn all_balances(&self) -> Result<Vec<Balance>, BackendError> {
        self.inner.all_balances()
    }
}

/// Cache backend that is always down
#[derive(Debug)]
struct UnreachableCache;

impl CacheBackend for UnreachableCache {
    fn get(&self, _: &str) -> Result<Option<String>, BackendError> {
        Err(BackendError::unavailable("cache", "connection reset"))
    }

    fn set(&self, _: &str, _: String, _: Duration) -> Result<(), BackendError> {
        Err(BackendError::unavailable("cache", "connection reset"))
    }

    fn delete(&self, _: &str) -> Result<(), BackendError> {
        Err(BackendError::unavailable("cache", "connection reset"))
    }
}

fn mutator_over(store: Arc<dyn BalanceStore>, scope: LockScope) -> BalanceMutator {
    BalanceMutator::new(
        store,
        LockCoordinator::new(
            Arc::new(MemoryLeaseStore::new()),
            LockConfig::new(Duration::from_secs(10), scope).unwrap(),
        ),
        CacheLayer::new(Arc::new(MemoryCache::new()), DEFAULT_TTL),
    )
}

/// Retry while the error is retryable, as an HTTP caller would
fn with_retry(mutator: &BalanceMutator, request: MutationRequest) -> Result<MutationOutcome, LedgerError> {
    loop {
        match mutator.mutate(request) {
            Err(e) if e.is_retryable() => thread::yield_now(),
            other => return other,
        }
    }
}

#[test]
fn test_concurrent_mutations_never_overlap() {
    let store = Arc::new(OverlapTrackingStore::default());
    store.register_user(1).unwrap();
    let mutator = Arc::new(mutator_over(store.clone(), LockScope::Unified));
    let barrier = Arc::new(Barrier::new(100));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let mutator = Arc::clone(&mutator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..5 {
                    with_retry(&mutator, MutationRequest::add(1, 1, 1)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(mutator.balance(1, 1).unwrap().quantity, 500);
    assert_eq!(mutator.ledger(1, 1).unwrap().len(), 500);
}

#[test]
fn test_contended_lease_fails_fast() {
    let store = Arc::new(OverlapTrackingStore::default());
    store.register_user(1).unwrap();
    let mutator = Arc::new(mutator_over(store, LockScope::Unified));
    mutator.add(1, 1, 100).unwrap();

    let barrier = Arc::new(Barrier::new(16));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let mutator = Arc::clone(&mutator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                mutator.subtract(1, 1, 1)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let locked = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::ResourceLocked { .. })))
        .count();

    assert!(succeeded >= 1);
    assert_eq!(succeeded + locked, 16);
    assert_eq!(
        mutator.balance(1, 1).unwrap().quantity,
        100 - succeeded as u64
    );
}

#[rstest]
#[case::unified(LockScope::Unified)]
#[case::per_kind(LockScope::PerKind)]
fn test_add_and_subtract_race_loses_nothing(#[case] scope: LockScope) {
    let store = Arc::new(MemoryBalanceStore::new());
    store.register_user(1).unwrap();
    let mutator = Arc::new(mutator_over(store, scope));
    mutator.add(1, 1, 100).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let requests = [
        MutationRequest::add(1, 1, 50),
        MutationRequest::subtract(1, 1, 30),
    ];
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let mutator = Arc::clone(&mutator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                with_retry(&mutator, request)
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(mutator.balance(1, 1).unwrap().quantity, 120);
    let ledger = mutator.ledger(1, 1).unwrap();
    assert_eq!(ledger.len(), 3);
    assert_eq!(ledger.iter().map(|e| e.delta).sum::<i64>(), 120);
}

#[rstest]
#[case::unified(LockScope::Unified)]
#[case::per_kind(LockScope::PerKind)]
fn test_balance_never_negative_and_ledger_balances(#[case] scope: LockScope) {
    let store = Arc::new(MemoryBalanceStore::new());
    store.register_user(1).unwrap();
    let mutator = Arc::new(mutator_over(store, scope));
    mutator.add(1, 1, 50).unwrap();

    let barrier = Arc::new(Barrier::new(20));
    let handles: Vec<_> = (0..20)
        .map(|i| {
            let mutator = Arc::clone(&mutator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..10 {
                    let request = if i % 2 == 0 {
                        MutationRequest::add(1, 1, 3)
                    } else {
                        MutationRequest::subtract(1, 1, 7)
                    };
                    match with_retry(&mutator, request) {
                        Ok(outcome) => assert!(outcome.ledger_entry.balance_after <= 50 + 300),
                        Err(LedgerError::InsufficientFunds { .. }) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let balance = mutator.balance(1, 1).unwrap();
    let ledger = mutator.ledger(1, 1).unwrap();
    let sum: i64 = ledger.iter().map(|e| e.delta).sum();

    assert_eq!(sum, balance.quantity as i64);
    assert_eq!(ledger.len() as u64, balance.version);
    assert!(ledger.windows(2).all(|w| w[0].id < w[1].id));
    // Replaying the ledger never dips below zero
    let mut running: i64 = 0;
    for entry in &ledger {
        running += entry.delta;
        assert!(running >= 0);
        assert_eq!(running as u64, entry.balance_after);
    }
}

#[test]
fn test_failed_commit_releases_lease() {
    let store = Arc::new(FailingCommitStore::default());
    store.register_user(1).unwrap();
    let mutator = mutator_over(store, LockScope::Unified);

    let error = mutator.add(1, 1, 10).unwrap_err();

    assert!(matches!(
        error,
        LedgerError::StorageFailure { ref operation, .. } if operation == "commit"
    ));
    assert!(!error.is_retryable());
    // The lease is free again immediately, not after expiry
    let guard = mutator.locks().acquire("currency_lock:1").unwrap();
    assert!(guard.release());
}

#[test]
fn test_unreachable_cache_does_not_fail_mutations() {
    let store = Arc::new(MemoryBalanceStore::new());
    store.register_user(1).unwrap();
    let mutator = BalanceMutator::new(
        store,
        LockCoordinator::new(Arc::new(MemoryLeaseStore::new()), LockConfig::default()),
        CacheLayer::new(Arc::new(UnreachableCache), DEFAULT_TTL),
    );

    mutator.add(1, 1, 100).unwrap();
    let outcome = mutator.subtract(1, 1, 40).unwrap();

    assert_eq!(outcome.balance.quantity, 60);
    assert_eq!(mutator.balance(1, 1).unwrap().quantity, 60);
}

#[test]
fn test_users_do_not_block_each_other() {
    let store = Arc::new(MemoryBalanceStore::new());
    store.register_user(1).unwrap();
    store.register_user(2).unwrap();
    let mutator = mutator_over(store, LockScope::Unified);
    let _held = mutator.locks().acquire("currency_lock:1").unwrap();

    assert!(matches!(
        mutator.add(1, 1, 5),
        Err(LedgerError::ResourceLocked { .. })
    ));
    assert_eq!(mutator.add(2, 1, 5).unwrap().balance.quantity, 5);
}
