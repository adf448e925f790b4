mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bankledger::application::LedgerError;
use bankledger::domain::{AccountStatus, PostingRequest, TransferRequest};
use common::{Customer, balance, movement_count, test_service, test_service_with};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_credits_are_all_applied() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);
    let account = Customer::new().open(&service, "ACC-1", 0).await?;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let service = Arc::clone(&service);
        let id = account.id;
        handles.push(tokio::spawn(async move {
            service.engine().post(PostingRequest::credit(id, 100)).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(balance(&service, &account).await?, 2_500);
    assert_eq!(movement_count(&service, &account).await?, 25);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);
    let account = Customer::new().open(&service, "ACC-1", 1_000).await?;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let service = Arc::clone(&service);
        let id = account.id;
        handles.push(tokio::spawn(async move {
            service.engine().post(PostingRequest::debit(id, 100)).await
        }));
    }

    let mut committed = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => committed += 1,
            Err(LedgerError::InsufficientFunds { .. }) => refused += 1,
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(committed, 10);
    assert_eq!(refused, 10);
    assert_eq!(balance(&service, &account).await?, 0);
    assert_eq!(movement_count(&service, &account).await?, 10);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() -> Result<()> {
    let (service, _temp) =
        test_service_with(|c| c.with_unit_timeout(Duration::from_secs(10))).await?;
    let service = Arc::new(service);
    let customer = Customer::new();
    let a = customer.open(&service, "ACC-A", 5_000).await?;
    let b = customer.open(&service, "ACC-B", 5_000).await?;

    // Each round: A -> B 20.00 and B -> A 10.00, racing each other
    let mut handles = Vec::new();
    for _ in 0..10 {
        let forward = Arc::clone(&service);
        let (from, to) = (a.id, b.id);
        handles.push(tokio::spawn(async move {
            forward
                .engine()
                .transfer(TransferRequest::new(from, to, 200))
                .await
        }));

        let backward = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            backward
                .engine()
                .transfer(TransferRequest::new(to, from, 100))
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    // Net 10 x 10.00 moved from A to B, nothing created or lost
    assert_eq!(balance(&service, &a).await?, 4_000);
    assert_eq!(balance(&service, &b).await?, 6_000);
    assert_eq!(movement_count(&service, &a).await?, 20);
    assert_eq!(movement_count(&service, &b).await?, 20);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_racing_postings_keeps_ledger_consistent() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);
    let account = Customer::new().open(&service, "ACC-1", 0).await?;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        let id = account.id;
        handles.push(tokio::spawn(async move {
            service.engine().post(PostingRequest::credit(id, 100)).await
        }));
    }
    service.accounts().close(account.id).await?;

    let mut committed = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => committed += 1,
            Err(LedgerError::AccountClosed(_)) => refused += 1,
            Err(other) => return Err(other.into()),
        }
    }

    // Every posting either landed before the close or was refused after it
    assert_eq!(committed + refused, 10);
    let closed = service.accounts().get(account.id).await?;
    assert_eq!(closed.status, AccountStatus::Closed);
    assert!(closed.closed_at.is_some());

    // Whatever landed before the close is reflected exactly once
    assert_eq!(closed.balance, committed * 100);
    assert_eq!(movement_count(&service, &account).await?, committed as usize);
    assert!(service.check_integrity().await?.is_healthy());

    // Nothing gets through once the close has committed
    let late = service
        .engine()
        .post(PostingRequest::credit(account.id, 100))
        .await;
    assert!(matches!(late, Err(LedgerError::AccountClosed(_))));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unit_deadline_rolls_back_while_row_is_held() -> Result<()> {
    let (service, _temp) =
        test_service_with(|c| c.with_unit_timeout(Duration::from_millis(200))).await?;
    let account = Customer::new().open(&service, "ACC-1", 1_000).await?;

    // Another unit holds the account's row lock
    let mut holder = service.repository().begin_unit().await?;
    let locked = holder.lock_account_for_update(account.id).await?;
    assert_eq!(locked.map(|a| a.balance), Some(1_000));

    let result = service
        .engine()
        .post(PostingRequest::credit(account.id, 500))
        .await;
    assert!(matches!(result, Err(LedgerError::StorageUnavailable(_))));

    holder.rollback().await?;

    // Nothing from the timed out unit survived, and the row is usable again
    assert_eq!(balance(&service, &account).await?, 1_000);
    assert_eq!(movement_count(&service, &account).await?, 0);

    service
        .engine()
        .post(PostingRequest::credit(account.id, 500))
        .await?;
    assert_eq!(balance(&service, &account).await?, 1_500);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_opposite_transfers_settle_consistently() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);
    let customer = Customer::new();
    let a = customer.open(&service, "ACC-A", 50).await?;
    let b = customer.open(&service, "ACC-B", 50).await?;

    let forward = {
        let service = Arc::clone(&service);
        let (from, to) = (a.id, b.id);
        tokio::spawn(async move {
            service
                .engine()
                .transfer(TransferRequest::new(from, to, 30))
                .await
        })
    };
    let backward = {
        let service = Arc::clone(&service);
        let (from, to) = (b.id, a.id);
        tokio::spawn(async move {
            service
                .engine()
                .transfer(TransferRequest::new(from, to, 20))
                .await
        })
    };
    forward.await??;
    backward.await??;

    assert_eq!(balance(&service, &a).await?, 40);
    assert_eq!(balance(&service, &b).await?, 60);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_never_reports_a_committed_posting_as_failed() -> Result<()> {
    let (service, _temp) =
        test_service_with(|c| c.with_unit_timeout(Duration::from_millis(2))).await?;
    let service = Arc::new(service);
    let account = Customer::new().open(&service, "ACC-1", 0).await?;

    let mut handles = Vec::new();
    for _ in 0..40 {
        let service = Arc::clone(&service);
        let id = account.id;
        handles.push(tokio::spawn(async move {
            service.engine().post(PostingRequest::credit(id, 100)).await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => committed += 1,
            Err(LedgerError::StorageUnavailable(_)) => {}
            Err(other) => return Err(other.into()),
        }
    }

    // A posting reported as timed out must not have landed
    assert_eq!(balance(&service, &account).await?, committed * 100);
    assert_eq!(movement_count(&service, &account).await?, committed as usize);
    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}
