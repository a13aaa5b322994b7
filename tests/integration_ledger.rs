//! Integration tests for the ledger services (requires DATABASE_URL)

use chrono::{Duration, Utc};
use loyalty_ledger::accounts::{AccountDirectory, Registration};
use loyalty_ledger::domain::{
    AccountSign, Amount, DomainError, ErrorKind, MovementKind, NewMovement, OrderNumber,
    OrderStatus,
};
use loyalty_ledger::jobs::{close_balances, closing_cutoff};
use loyalty_ledger::ledger::LedgerStore;
use loyalty_ledger::orders::{AccrualUpdate, OrderIntake};
use loyalty_ledger::withdrawals::WithdrawalIssuer;
use loyalty_ledger::{LedgerConfig, StoreError};

mod common;

struct Services {
    directory: AccountDirectory,
    orders: OrderIntake,
    withdrawals: WithdrawalIssuer,
    ledger: LedgerStore,
}

fn services(db: &common::TestDb) -> Services {
    Services {
        directory: AccountDirectory::new(db.pool.clone(), db.ledger.clone()),
        orders: OrderIntake::new(db.pool.clone(), db.ledger.clone()),
        withdrawals: WithdrawalIssuer::new(db.pool.clone(), db.ledger.clone()),
        ledger: LedgerStore::new(db.pool.clone()),
    }
}

fn order(number: i64) -> OrderNumber {
    OrderNumber::new(number).unwrap()
}

fn points(minor: i64) -> Amount {
    Amount::from_minor(minor).unwrap()
}

fn domain(err: StoreError) -> DomainError {
    match err {
        StoreError::Domain(e) => e,
        other => panic!("expected a domain error, got {other:?}"),
    }
}

/// Register a person and credit `minor` points through a processed order
async fn funded_person(s: &Services, login: &str, number: i64, minor: i64) -> i64 {
    let (person, _) = s
        .directory
        .register(Registration::new(login, "!QAZ2wsx"))
        .await
        .unwrap();
    s.orders.submit(person.id, order(number)).await.unwrap();
    let update = AccrualUpdate::new(OrderStatus::Processed, Some(points(minor)));
    s.orders.apply_accrual(number, update).await.unwrap();
    person.id
}

// =========================================================================
// Account Directory
// =========================================================================

#[tokio::test]
async fn test_register_opens_account() {
    let db = common::setup_test_db().await;
    let s = services(&db);

    let (person, account) = s
        .directory
        .register(Registration::new("dmaslov", "!QAZ2wsx"))
        .await
        .unwrap();

    assert_eq!(account.person_id, Some(person.id));
    assert_eq!(account.number.len(), 20);
    assert!(account.number.starts_with(&db.ledger.account_number_prefix));
    assert_eq!(account.sign, db.ledger.person_account_sign);

    let accounts = s.directory.accounts_of(person.id).await.unwrap();
    assert_eq!(accounts, vec![account]);

    let found = s.directory.authenticate("dmaslov", "!QAZ2wsx").await.unwrap();
    assert_eq!(found.id, person.id);

    let err = s.directory.authenticate("dmaslov", "wrong").await.unwrap_err();
    assert_eq!(domain(err), DomainError::InvalidCredentials);
}

#[tokio::test]
async fn test_duplicate_login_rolls_back() {
    let db = common::setup_test_db().await;
    let s = services(&db);

    s.directory
        .register(Registration::new("alice", "secret"))
        .await
        .unwrap();
    let err = s
        .directory
        .register(Registration::new("alice", "other"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(domain(err), DomainError::UserExists("alice".to_string()));

    let persons: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM person")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    let person_accounts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE person_id IS NOT NULL")
            .fetch_one(&db.pool)
            .await
            .unwrap();
    assert_eq!(persons, 1);
    assert_eq!(person_accounts, 1);
}

#[tokio::test]
async fn test_system_account_is_idempotent() {
    let db = common::setup_test_db().await;
    let s = services(&db);

    let first = s.directory.create_system_account().await.unwrap();
    let second = s.directory.create_system_account().await.unwrap();

    assert_eq!(first, second);
    assert!(first.is_system());
    assert_eq!(first.number, db.ledger.clearing_account_number);
    assert_eq!(first.sign, db.ledger.clearing_account_sign());
}

// =========================================================================
// Order Intake
// =========================================================================

#[tokio::test]
async fn test_order_resubmission_is_duplicate() {
    let db = common::setup_test_db().await;
    let s = services(&db);
    let (person, _) = s
        .directory
        .register(Registration::new("bob", "secret"))
        .await
        .unwrap();

    let first = s.orders.submit(person.id, order(79927398713)).await.unwrap();
    assert_eq!(first.status, OrderStatus::New);

    for _ in 0..3 {
        let err = s.orders.submit(person.id, order(79927398713)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdempotentDuplicate);
    }

    let orders = s.orders.orders_of(person.id).await.unwrap();
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn test_order_owned_by_other_person() {
    let db = common::setup_test_db().await;
    let s = services(&db);
    let (alice, _) = s
        .directory
        .register(Registration::new("alice", "secret"))
        .await
        .unwrap();
    let (bob, _) = s
        .directory
        .register(Registration::new("bob", "secret"))
        .await
        .unwrap();

    s.orders.submit(alice.id, order(12345678903)).await.unwrap();
    let err = s.orders.submit(bob.id, order(12345678903)).await.unwrap_err();

    assert_eq!(domain(err), DomainError::OrderOwnedByOther(12345678903));
    assert_eq!(s.orders.order(12345678903).await.unwrap().person_id, alice.id);
    assert!(s.orders.orders_of(bob.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_submissions_keep_one_owner() {
    let db = common::setup_test_db().await;
    let s = services(&db);

    let mut people = Vec::new();
    for login in ["judy", "ken", "lena"] {
        let (person, _) = s
            .directory
            .register(Registration::new(login, "secret"))
            .await
            .unwrap();
        people.push(person.id);
    }

    // Every person submits the same number twice, all at once
    let mut handles = Vec::new();
    for person_id in people.iter().chain(people.iter()).copied() {
        let intake = s.orders.clone();
        handles.push(tokio::spawn(async move {
            (person_id, intake.submit(person_id, order(79927398713)).await)
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let winners: Vec<i64> = results
        .iter()
        .filter_map(|(person_id, result)| result.as_ref().ok().map(|_| *person_id))
        .collect();
    assert_eq!(winners.len(), 1);
    let owner = winners[0];

    for (person_id, result) in results {
        let Err(err) = result else { continue };
        if person_id == owner {
            assert_eq!(domain(err), DomainError::DuplicateOrder(79927398713));
        } else {
            assert_eq!(domain(err), DomainError::OrderOwnedByOther(79927398713));
        }
    }

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE number = $1")
        .bind(79927398713i64)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let stored = s.orders.order(79927398713).await.unwrap();
    assert_eq!(stored.person_id, owner);
    assert_eq!(stored.status, OrderStatus::New);
}

#[tokio::test]
async fn test_bad_checksum_is_rejected_before_the_store() {
    let db = common::setup_test_db().await;
    let s = services(&db);
    let (person, _) = s
        .directory
        .register(Registration::new("carol", "secret"))
        .await
        .unwrap();

    let err = s.orders.submit_raw(person.id, "79927398710").await.unwrap_err();
    assert_eq!(domain(err), DomainError::Checksum(79927398710));

    let err = s.orders.submit_raw(person.id, "7992a").await.unwrap_err();
    assert!(matches!(domain(err), DomainError::MalformedNumber(_)));
}

#[tokio::test]
async fn test_accrual_credits_once() {
    let db = common::setup_test_db().await;
    let s = services(&db);
    let person_id = funded_person(&s, "dave", 79927398713, 50000).await;

    // Repeating the final verdict changes nothing
    let repeat = AccrualUpdate::new(OrderStatus::Processed, Some(points(50000)));
    s.orders.apply_accrual(79927398713, repeat).await.unwrap();

    let err = s
        .orders
        .apply_accrual(79927398713, AccrualUpdate::new(OrderStatus::Processing, None))
        .await
        .unwrap_err();
    assert!(matches!(domain(err), DomainError::StatusRegression { .. }));

    let summary = s.withdrawals.summary(person_id).await.unwrap();
    assert_eq!(summary.current, 50000);
    assert_eq!(summary.withdrawn, 0);

    let accruals: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movement WHERE kind = 'accrual'")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(accruals, 1);
}

// =========================================================================
// Withdrawal Issuer
// =========================================================================

#[tokio::test]
async fn test_withdraw_exact_balance_then_one_more() {
    let db = common::setup_test_db().await;
    let s = services(&db);
    let person_id = funded_person(&s, "erin", 79927398713, 50000).await;

    let movement = s
        .withdrawals
        .withdraw(person_id, order(2377225624), points(50000))
        .await
        .unwrap();
    assert_eq!(movement.kind, MovementKind::Withdrawal);
    assert_eq!(movement.order_number, Some(2377225624));
    assert_eq!(movement.amount, 50000);

    let err = s
        .withdrawals
        .withdraw(person_id, order(12345678903), points(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(domain(err), DomainError::insufficient_funds(1, 0));

    let summary = s.withdrawals.summary(person_id).await.unwrap();
    assert_eq!(summary.current, 0);
    assert_eq!(summary.withdrawn, 50000);

    let withdrawals = s.withdrawals.withdrawals_of(person_id).await.unwrap();
    assert_eq!(withdrawals.len(), 1);
}

#[tokio::test]
async fn test_overdraw_writes_nothing() {
    let db = common::setup_test_db().await;
    let s = services(&db);
    let person_id = funded_person(&s, "frank", 79927398713, 10000).await;

    let err = s
        .withdrawals
        .withdraw(person_id, order(2377225624), points(10001))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

    let withdrawals: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM movement WHERE kind = 'withdrawal'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
    assert_eq!(withdrawals, 0);
    assert_eq!(s.withdrawals.summary(person_id).await.unwrap().current, 10000);
}

#[tokio::test]
async fn test_concurrent_withdrawals_do_not_overdraw() {
    let db = common::setup_test_db().await;
    let s = services(&db);
    let person_id = funded_person(&s, "grace", 79927398713, 50000).await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let issuer = s.withdrawals.clone();
        handles.push(tokio::spawn(async move {
            issuer
                .withdraw(person_id, order(2377225624), points(20000))
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::InsufficientFunds),
        }
    }

    assert_eq!(succeeded, 2);
    let summary = s.withdrawals.summary(person_id).await.unwrap();
    assert_eq!(summary.current, 10000);
    assert_eq!(summary.withdrawn, 40000);
}

// =========================================================================
// Snapshots and closing
// =========================================================================

#[tokio::test]
async fn test_closing_fixes_balance_without_double_counting() {
    let db = common::setup_test_db().await;
    let s = services(&db);
    let person_id = funded_person(&s, "heidi", 79927398713, 50000).await;
    let account = s.directory.accounts_of(person_id).await.unwrap().remove(0);

    let err = s.ledger.snapshot(&account, Utc::now()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    common::backdate_account(&db.pool, &account.number, 3).await;
    common::backdate_movements(&db.pool, &account.number, 2).await;
    let account = s.directory.accounts_of(person_id).await.unwrap().remove(0);

    let cutoff = closing_cutoff(Utc::now(), std::time::Duration::ZERO).unwrap();
    let report = close_balances(&db.pool, cutoff).await.unwrap();
    assert_eq!(report.accounts_closed, 1);

    let snapshot = s.ledger.snapshot(&account, Utc::now()).await.unwrap();
    assert_eq!(snapshot.as_of, cutoff);
    assert_eq!(snapshot.balance, 50000);
    assert_eq!(s.ledger.balance(&account).await.unwrap(), 50000);

    // Re-running with the same cutoff is a no-op
    let report = close_balances(&db.pool, cutoff).await.unwrap();
    assert_eq!(report.accounts_closed, 0);

    // Movements after the cutoff are added on top of the snapshot
    s.withdrawals
        .withdraw(person_id, order(2377225624), points(20000))
        .await
        .unwrap();
    assert_eq!(s.ledger.balance(&account).await.unwrap(), 30000);
    assert_eq!(s.ledger.withdrawn_total(&account).await.unwrap(), 20000);

    // A snapshot before the cutoff is not visible yet
    let err = s
        .ledger
        .snapshot(&account, cutoff - Duration::seconds(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_movement_at_snapshot_date_counts_once() {
    let db = common::setup_test_db().await;
    let s = services(&db);
    let person_id = funded_person(&s, "mike", 79927398713, 50000).await;
    let account = s.directory.accounts_of(person_id).await.unwrap().remove(0);
    let clearing = s.directory.clearing_account().await.unwrap();

    let cutoff = closing_cutoff(Utc::now(), std::time::Duration::ZERO).unwrap();
    common::backdate_account(&db.pool, &account.number, 3).await;
    let account = s.directory.accounts_of(person_id).await.unwrap().remove(0);

    let accrual_id: i64 = sqlx::query_scalar("SELECT id FROM movement WHERE kind = 'accrual'")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    common::set_movement_date(&db.pool, accrual_id, cutoff - Duration::days(2)).await;

    let before = s
        .withdrawals
        .withdraw(person_id, order(2377225624), points(10000))
        .await
        .unwrap();
    common::set_movement_date(&db.pool, before.id, cutoff - Duration::microseconds(1)).await;

    let posting = account
        .sign
        .withdrawal_posting(&account.number, &clearing.number);
    let movement = NewMovement::new(MovementKind::Withdrawal, posting, 5000)
        .unwrap()
        .with_person(person_id)
        .with_order(12345678903);
    let at_cutoff = s.ledger.append_movement(movement).await.unwrap();
    common::set_movement_date(&db.pool, at_cutoff.id, cutoff).await;

    let report = close_balances(&db.pool, cutoff).await.unwrap();
    assert_eq!(report.accounts_closed, 1);

    // The snapshot holds everything strictly before the cutoff
    let snapshot = s.ledger.snapshot(&account, cutoff).await.unwrap();
    assert_eq!(snapshot.as_of, cutoff);
    assert_eq!(snapshot.balance, 40000);
    assert_eq!(snapshot.debit_total, 10000);
    assert_eq!(snapshot.credit_total, 50000);

    // The movement dated exactly at the cutoff is added on top, once
    assert_eq!(s.ledger.balance(&account).await.unwrap(), 35000);
    assert_eq!(s.ledger.withdrawn_total(&account).await.unwrap(), 15000);

    let summary = s.withdrawals.summary(person_id).await.unwrap();
    assert_eq!(summary.current, 35000);
    assert_eq!(summary.withdrawn, 15000);
}

#[tokio::test]
async fn test_active_person_accounts() {
    let ledger = LedgerConfig {
        person_account_sign: AccountSign::Active,
        ..LedgerConfig::default()
    };
    let db = common::setup_test_db_with(ledger).await;
    let s = services(&db);

    let clearing = s.directory.clearing_account().await.unwrap();
    assert_eq!(clearing.sign, AccountSign::Passive);

    let person_id = funded_person(&s, "nina", 79927398713, 50000).await;
    assert_eq!(s.directory.person(person_id).await.unwrap().login, "nina");
    let account = s.directory.accounts_of(person_id).await.unwrap().remove(0);
    assert_eq!(account.sign, AccountSign::Active);
    assert_eq!(s.ledger.balance(&account).await.unwrap(), 50000);

    // Active accounts are credited on the way out
    let movement = s
        .withdrawals
        .withdraw(person_id, order(2377225624), points(20000))
        .await
        .unwrap();
    assert_eq!(movement.credit_account, account.number);
    assert_eq!(movement.debit_account, clearing.number);

    let err = s
        .withdrawals
        .withdraw(person_id, order(12345678903), points(30001))
        .await
        .unwrap_err();
    assert_eq!(domain(err), DomainError::insufficient_funds(30001, 30000));

    let summary = s.withdrawals.summary(person_id).await.unwrap();
    assert_eq!(summary.current, 30000);
    assert_eq!(summary.withdrawn, 20000);

    let outflows = s.ledger.outflows(&account).await.unwrap();
    assert_eq!(outflows.len(), 1);
    assert_eq!(outflows[0].id, movement.id);
    assert_eq!(s.ledger.balance(&clearing).await.unwrap(), 30000);

    // Closing keeps the credit-side outflow in the snapshot totals
    common::backdate_account(&db.pool, &account.number, 3).await;
    common::backdate_movements(&db.pool, &account.number, 2).await;
    let account = s.directory.accounts_of(person_id).await.unwrap().remove(0);

    let cutoff = closing_cutoff(Utc::now(), std::time::Duration::ZERO).unwrap();
    close_balances(&db.pool, cutoff).await.unwrap();

    let snapshot = s.ledger.snapshot(&account, cutoff).await.unwrap();
    assert_eq!(snapshot.balance, 30000);
    assert_eq!(snapshot.debit_total, 50000);
    assert_eq!(snapshot.credit_total, 20000);
    assert_eq!(s.ledger.balance(&account).await.unwrap(), 30000);
    assert_eq!(s.ledger.withdrawn_total(&account).await.unwrap(), 20000);
}

#[tokio::test]
async fn test_movements_are_append_only() {
    let db = common::setup_test_db().await;
    let s = services(&db);
    funded_person(&s, "ivan", 79927398713, 100).await;

    let result = sqlx::query("UPDATE movement SET amount = 0")
        .execute(&db.pool)
        .await;
    assert!(result.is_err());

    let result = sqlx::query("DELETE FROM movement").execute(&db.pool).await;
    assert!(result.is_err());
}
