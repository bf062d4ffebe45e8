mod common;

use common::{FakeBackend, addr, wallet};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use wallet_chain_sync::backend::{BackendError, BlockchainBackend};
use wallet_chain_sync::wallet::sync::events::EventDispatcher;
use wallet_chain_sync::wallet::sync::progress_tracker::ScanProgressTracker;
use wallet_chain_sync::wallet::sync::repositories::{FileIndexCacheRepository, IndexCacheRepository};
use wallet_chain_sync::wallet::sync::strategies::{
    FastScan, FullScan, ScanConfig, ScanOutcome, ScanStrategy,
};
use wallet_chain_sync::wallet::{Branch, Wallet, WalletSyncError, WalletSyncOrchestrator};

const EXTERNAL: Branch = Branch {
    mixdepth: 0,
    is_change: false,
};
const CHANGE: Branch = Branch {
    mixdepth: 0,
    is_change: true,
};

async fn full_scan(
    wallet: &mut Wallet,
    backend: &dyn BlockchainBackend,
) -> Result<ScanOutcome, WalletSyncError> {
    let mut dispatcher = EventDispatcher::new();
    let mut tracker = ScanProgressTracker::new(wallet.branches().count());
    FullScan::new(ScanConfig { batch_size: 20 })
        .scan(wallet, backend, &mut dispatcher, &mut tracker)
        .await
}

#[tokio::test]
async fn index_lands_after_the_last_used_address() {
    let (mut wallet, _) = wallet(1, 6);
    let backend = FakeBackend::explorer().with_used([0, 2, 5].map(|i| addr(0, false, i)));

    let outcome = full_scan(&mut wallet, &backend).await.unwrap();

    assert_eq!(outcome, ScanOutcome::Completed);
    assert_eq!(wallet.index(EXTERNAL), 6);
    assert_eq!(wallet.index(CHANGE), 0);
    let mut recorded: Vec<u32> = wallet.address_records().values().map(|r| r.index).collect();
    recorded.sort();
    assert_eq!(recorded, vec![0, 2, 5]);
    assert!(
        wallet
            .address_records()
            .values()
            .all(|record| record.branch == EXTERNAL)
    );
}

#[tokio::test]
async fn empty_wallet_derives_one_gap_per_branch() {
    let (mut wallet, deriver) = wallet(2, 6);
    let backend = FakeBackend::explorer();

    full_scan(&mut wallet, &backend).await.unwrap();

    assert_eq!(wallet.indices(), &[[0, 0], [0, 0]]);
    assert!(wallet.address_records().is_empty());
    assert_eq!(deriver.derivations.load(Ordering::SeqCst), 4 * 6);
    assert_eq!(backend.usage_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn index_never_drops_below_the_cache() {
    let (wallet, _) = wallet(1, 6);
    let mut wallet = wallet.with_index_cache(vec![[10, 0]]);
    let backend = FakeBackend::explorer().with_used([addr(0, false, 2)]);

    full_scan(&mut wallet, &backend).await.unwrap();

    assert_eq!(wallet.index(EXTERNAL), 10);
    assert_eq!(wallet.index(CHANGE), 0);
}

#[tokio::test]
async fn failed_scan_keeps_indices_at_or_above_the_cache() {
    let (wallet, _) = wallet(1, 6);
    let mut wallet = wallet.with_index_cache(vec![[100, 0]]);
    wallet.set_index(EXTERNAL, 100);
    wallet.set_index(CHANGE, 4);
    let mut backend = FakeBackend::explorer().with_used([addr(0, false, 1)]);
    backend.usage_fails_after = Some(1);

    let err = full_scan(&mut wallet, &backend).await.unwrap_err();

    assert!(matches!(
        err,
        WalletSyncError::BackendError(BackendError::RetriesExhausted { .. })
    ));
    assert_eq!(backend.usage_calls.load(Ordering::SeqCst), 2);
    assert_eq!(wallet.index(EXTERNAL), 100);
    assert_eq!(wallet.index(CHANGE), 4);
}

#[tokio::test]
async fn node_without_imports_requests_them_first() {
    let (mut wallet, _) = wallet(1, 6);
    let backend = FakeBackend::node();

    let err = full_scan(&mut wallet, &backend).await.unwrap_err();

    assert!(matches!(err, WalletSyncError::InsufficientImport { imported: 40 }));
    let imports = backend.imported();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].0, "test-wallet");
    let imported: HashSet<&String> = imports[0].1.iter().collect();
    assert!(imported.contains(&addr(0, false, 19)));
    assert!(imported.contains(&addr(0, true, 0)));
    assert!(!imported.contains(&addr(0, false, 20)));
}

#[tokio::test]
async fn reaching_untracked_addresses_imports_three_batches() {
    let (mut wallet, _) = wallet(1, 6);
    let backend = FakeBackend::node().with_used([5, 11, 17].map(|i| addr(0, false, i)));

    // First pass only imports the initial batch.
    let err = full_scan(&mut wallet, &backend).await.unwrap_err();
    assert!(matches!(err, WalletSyncError::InsufficientImport { imported: 40 }));

    let err = full_scan(&mut wallet, &backend).await.unwrap_err();
    assert!(matches!(err, WalletSyncError::InsufficientImport { imported: 60 }));
    assert_eq!(wallet.index(EXTERNAL), 18);

    let imports = backend.imported();
    let second = &imports[1].1;
    assert_eq!(second.first(), Some(&addr(0, false, 18)));
    assert_eq!(second.last(), Some(&addr(0, false, 77)));

    // Once the node watches enough, the scan settles.
    let outcome = full_scan(&mut wallet, &backend).await.unwrap();
    assert_eq!(outcome, ScanOutcome::Completed);
    assert_eq!(wallet.index(EXTERNAL), 18);
    assert_eq!(wallet.address_records().len(), 3);
}

#[tokio::test]
async fn fast_scan_is_unsupported_without_a_bulk_query() {
    let (wallet, _) = wallet(1, 6);
    let mut wallet = wallet.with_index_cache(vec![[3, 0]]);
    let backend = FakeBackend::explorer();
    let mut dispatcher = EventDispatcher::new();
    let mut tracker = ScanProgressTracker::new(2);

    let outcome = FastScan
        .scan(&mut wallet, &backend, &mut dispatcher, &mut tracker)
        .await
        .unwrap();

    assert_eq!(outcome, ScanOutcome::Unsupported);
    assert_eq!(wallet.indices(), &[[0, 0]]);
}

#[tokio::test]
async fn fast_scan_settles_from_the_bulk_set() {
    let (wallet, _) = wallet(1, 6);
    let mut wallet = wallet.with_index_cache(vec![[3, 0]]);
    let backend = FakeBackend::explorer();
    *backend.bulk_used.lock().unwrap() = Some(HashSet::from([
        addr(0, false, 1),
        addr(0, false, 4),
        // Past cache + gap, so the fast scan cannot see it.
        addr(0, false, 9),
    ]));
    let mut dispatcher = EventDispatcher::new();
    let mut tracker = ScanProgressTracker::new(2);

    let outcome = FastScan
        .scan(&mut wallet, &backend, &mut dispatcher, &mut tracker)
        .await
        .unwrap();

    assert_eq!(outcome, ScanOutcome::Completed);
    assert_eq!(wallet.index(EXTERNAL), 5);
    assert_eq!(wallet.index(CHANGE), 0);
    assert_eq!(wallet.address_records().len(), 2);
    assert!(tracker.validate_completion().is_ok());
}

#[tokio::test]
async fn orchestrator_falls_back_to_full_scan() {
    let (wallet, _) = wallet(1, 6);
    let shared = wallet.with_index_cache(vec![[3, 0]]).into_shared();
    let backend = Arc::new(FakeBackend::explorer().with_used([addr(0, false, 4)]));
    let mut orchestrator = WalletSyncOrchestrator::new(backend.clone(), ScanConfig::default());

    let report = orchestrator.sync_wallet(&shared, true).await.unwrap();

    assert!(!report.fast);
    assert_eq!(report.scan.branches_settled, 2);
    assert_eq!(shared.lock().await.index(EXTERNAL), 5);
}

#[tokio::test]
async fn orchestrator_uses_fast_scan_when_available() {
    let (wallet, _) = wallet(1, 6);
    let shared = wallet.with_index_cache(vec![[3, 0]]).into_shared();
    let backend = Arc::new(FakeBackend::explorer());
    *backend.bulk_used.lock().unwrap() = Some(HashSet::from([addr(0, true, 2)]));
    let mut orchestrator = WalletSyncOrchestrator::new(backend.clone(), ScanConfig::default());

    let report = orchestrator.sync_wallet(&shared, true).await.unwrap();

    assert!(report.fast);
    assert_eq!(backend.usage_calls.load(Ordering::SeqCst), 0);
    let wallet = shared.lock().await;
    assert_eq!(wallet.index(EXTERNAL), 3);
    assert_eq!(wallet.index(CHANGE), 3);
}

#[tokio::test]
async fn orchestrator_persists_settled_indices() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Arc::new(FileIndexCacheRepository::new(dir.path().to_path_buf()));
    let (wallet, _) = wallet(1, 6);
    let shared = wallet.into_shared();
    let backend = Arc::new(FakeBackend::explorer().with_used([addr(0, false, 0), addr(0, true, 3)]));
    let mut orchestrator = WalletSyncOrchestrator::new(backend, ScanConfig::default())
        .with_index_cache_repository(repository.clone());

    orchestrator.sync_wallet(&shared, false).await.unwrap();

    let saved = repository.load("test-wallet").await.unwrap();
    assert_eq!(saved, Some(vec![[1, 4]]));
}

#[tokio::test]
async fn orchestrator_restores_the_cache_before_scanning() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Arc::new(FileIndexCacheRepository::new(dir.path().to_path_buf()));
    repository.save("test-wallet", &[[12, 2]]).await.unwrap();
    let (wallet, _) = wallet(1, 6);
    let shared = wallet.into_shared();
    let backend = Arc::new(FakeBackend::explorer());
    let mut orchestrator = WalletSyncOrchestrator::new(backend, ScanConfig::default())
        .with_index_cache_repository(repository);

    orchestrator.sync_wallet(&shared, false).await.unwrap();

    assert_eq!(shared.lock().await.indices(), &[[12, 2]]);
}
