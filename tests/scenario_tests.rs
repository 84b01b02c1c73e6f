mod common;

use common::ledger;
use opledger::application::worker::{WorkerConfig, WorkerPool};
use opledger::domain::account::{AccountId, Version};
use opledger::domain::operation::{FinalState, LogPosition, Operation, OperationId};
use opledger::domain::ports::OperationStore;
use opledger::error::LedgerError;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn test_a_day_of_activity_settles_every_account() {
    let ledger = ledger();
    let pool = WorkerPool::start(
        ledger.work_queue.clone(),
        ledger.dispatcher.clone(),
        WorkerConfig {
            workers: 2,
            idle_timeout: Duration::from_millis(5),
        },
    );

    let alice = ledger.submitter.create_account().await.unwrap().id;
    let bob = ledger.submitter.create_account().await.unwrap().id;

    ledger.submitter.deposit(alice, dec!(100)).await.unwrap();
    ledger.submitter.deposit(bob, dec!(10)).await.unwrap();
    ledger.submitter.withdraw(alice, dec!(25)).await.unwrap();
    ledger.submitter.transfer(alice, bob, dec!(50)).await.unwrap();
    ledger.submitter.withdraw(bob, dec!(5)).await.unwrap();

    ledger.wait_until_settled(alice).await;
    ledger.wait_until_settled(bob).await;
    pool.shutdown().await;

    let alice_account = ledger.account(alice).await;
    assert_eq!(alice_account.balance.value(), dec!(25));
    assert_eq!(alice_account.version, Version::new(4));

    let bob_account = ledger.account(bob).await;
    assert_eq!(bob_account.balance.value(), dec!(55));
    assert_eq!(bob_account.version, Version::new(4));

    // Every slot in both logs carries a terminal state.
    for (account, last) in [(alice, 4), (bob, 4)] {
        for version in 1..=last {
            let state = ledger
                .final_state(LogPosition::new(account, Version::new(version)))
                .await;
            assert_eq!(state, Some(FinalState::Applied), "{account}@v{version}");
        }
    }
}

#[tokio::test]
async fn test_transfer_legs_share_one_transfer_identity() {
    let ledger = ledger();

    let from = ledger.submitter.create_account().await.unwrap().id;
    let to = ledger.submitter.create_account().await.unwrap().id;
    ledger.submitter.deposit(from, dec!(100)).await.unwrap();
    ledger.submitter.transfer(from, to, dec!(40)).await.unwrap();

    // The debit leg returned applied; the credit leg is still queued.
    assert_eq!(ledger.work_queue.len(), 1);
    ledger.drain_backlog(to).await;

    let debit = OperationStore::find(&*ledger.store, LogPosition::new(from, Version::new(3)))
        .await
        .unwrap()
        .expect("debit leg should be logged");
    let credit = OperationStore::find(&*ledger.store, LogPosition::new(to, Version::new(2)))
        .await
        .unwrap()
        .expect("credit leg should be logged");

    let Operation::TransferFrom(debit_detail) = debit.operation else {
        panic!("unexpected operation at the debit position: {:?}", debit.operation);
    };
    let Operation::TransferTo(credit_detail) = credit.operation else {
        panic!("unexpected operation at the credit position: {:?}", credit.operation);
    };

    assert_eq!(debit_detail.transfer_id, credit_detail.transfer_id);
    assert_eq!(credit.id, OperationId::for_transfer_credit(debit_detail.transfer_id));
    assert_eq!(debit.final_state, Some(FinalState::Applied));
    assert_eq!(credit.final_state, Some(FinalState::Applied));

    assert_eq!(ledger.account(from).await.balance.value(), dec!(60));
    assert_eq!(ledger.account(to).await.balance.value(), dec!(40));
}

#[tokio::test]
async fn test_transfer_into_a_missing_account_rejects_the_credit_leg() {
    let ledger = ledger();

    let from = ledger.submitter.create_account().await.unwrap().id;
    ledger.submitter.deposit(from, dec!(100)).await.unwrap();

    let ghost = AccountId::generate();
    ledger.submitter.transfer(from, ghost, dec!(40)).await.unwrap();
    ledger.drain_backlog(ghost).await;

    // The debit leg stands; the credit leg finalizes as rejected.
    assert_eq!(ledger.account(from).await.balance.value(), dec!(60));
    let credit_state = ledger
        .final_state(LogPosition::new(ghost, Version::FIRST))
        .await
        .expect("credit leg should be finalized");
    assert_eq!(
        credit_state.rejection_reason(),
        Some(format!("Account '{ghost}' does not exist").as_str())
    );
}

#[tokio::test]
async fn test_rejected_withdrawal_reports_the_exact_reason() {
    let ledger = ledger();

    let account = ledger.submitter.create_account().await.unwrap().id;
    ledger.submitter.deposit(account, dec!(10)).await.unwrap();

    let err = ledger
        .submitter
        .withdraw(account, dec!(10.01))
        .await
        .unwrap_err();
    match err {
        LedgerError::Rejected(reason) => {
            assert_eq!(reason, format!("Insufficient funds on account '{account}'"));
        }
        other => panic!("expected a rejection, got {other:?}"),
    }

    // The rejected attempt consumed a version slot without touching funds.
    let account_record = ledger.account(account).await;
    assert_eq!(account_record.balance.value(), dec!(10));
    assert_eq!(account_record.version, Version::new(2));
    let state = ledger
        .final_state(LogPosition::new(account, Version::new(3)))
        .await;
    assert!(matches!(state, Some(FinalState::Rejected(_))));
}
