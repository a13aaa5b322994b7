//! Common test utilities

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use loyalty_ledger::accounts::AccountDirectory;
use loyalty_ledger::api::middleware::api_key_digest;
use loyalty_ledger::LedgerConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};

pub const TEST_API_KEY: &str = "test_key_123";

/// Tests in one binary share the database; each holds this for its whole run
static DB_LOCK: Mutex<()> = Mutex::const_new(());

/// Database handle for one test
pub struct TestDb {
    pub pool: PgPool,
    pub ledger: LedgerConfig,
    _guard: MutexGuard<'static, ()>,
}

/// Setup test database - apply migrations, truncate tables and seed test data
pub async fn setup_test_db() -> TestDb {
    setup_test_db_with(LedgerConfig::default()).await
}

/// Same as [`setup_test_db`], with the clearing account opened for `ledger`
pub async fn setup_test_db_with(ledger: LedgerConfig) -> TestDb {
    let guard = DB_LOCK.lock().await;

    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to apply migrations");

    sqlx::query(
        "TRUNCATE TABLE movement, balance_snapshot, orders, account, person, api_keys RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    sqlx::query(
        r#"
        INSERT INTO api_keys (name, key_hash, key_prefix, is_active)
        VALUES ($1, $2, $3, TRUE)
        "#,
    )
    .bind("Test Key")
    .bind(api_key_digest(TEST_API_KEY))
    .bind("test_")
    .execute(&pool)
    .await
    .expect("Failed to seed API key");

    AccountDirectory::new(pool.clone(), ledger.clone())
        .create_system_account()
        .await
        .expect("Failed to open clearing account");

    TestDb {
        pool,
        ledger,
        _guard: guard,
    }
}

/// Shift every movement of an account back in time so a snapshot can absorb it.
///
/// Movements are append-only; the trigger is disabled for this fixture only.
pub async fn backdate_movements(pool: &PgPool, account_number: &str, days: i32) {
    let mut tx = pool.begin().await.expect("Failed to begin transaction");

    sqlx::query("ALTER TABLE movement DISABLE TRIGGER movement_append_only")
        .execute(&mut *tx)
        .await
        .expect("Failed to disable trigger");

    sqlx::query(
        r#"
        UPDATE movement
        SET operation_date = operation_date - make_interval(days => $2)
        WHERE debit_account = $1 OR credit_account = $1
        "#,
    )
    .bind(account_number)
    .bind(days)
    .execute(&mut *tx)
    .await
    .expect("Failed to backdate movements");

    sqlx::query("ALTER TABLE movement ENABLE TRIGGER movement_append_only")
        .execute(&mut *tx)
        .await
        .expect("Failed to enable trigger");

    tx.commit().await.expect("Failed to commit transaction");
}

/// Pin one movement to an exact operation date
pub async fn set_movement_date(pool: &PgPool, movement_id: i64, at: DateTime<Utc>) {
    let mut tx = pool.begin().await.expect("Failed to begin transaction");

    sqlx::query("ALTER TABLE movement DISABLE TRIGGER movement_append_only")
        .execute(&mut *tx)
        .await
        .expect("Failed to disable trigger");

    sqlx::query("UPDATE movement SET operation_date = $2 WHERE id = $1")
        .bind(movement_id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .expect("Failed to date movement");

    sqlx::query("ALTER TABLE movement ENABLE TRIGGER movement_append_only")
        .execute(&mut *tx)
        .await
        .expect("Failed to enable trigger");

    tx.commit().await.expect("Failed to commit transaction");
}

/// Move an account's opening date back so the closing job picks it up
pub async fn backdate_account(pool: &PgPool, account_number: &str, days: i32) {
    sqlx::query(
        "UPDATE account SET created_at = created_at - make_interval(days => $2) WHERE number = $1",
    )
    .bind(account_number)
    .bind(days)
    .execute(pool)
    .await
    .expect("Failed to backdate account");
}
