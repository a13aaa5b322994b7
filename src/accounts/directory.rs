//! Account Directory
//!
//! Persons and their ledger accounts. Registration opens the person's account in
//! the same transaction as the person row, so a person never exists without one.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::config::LedgerConfig;
use crate::db::{decode_column, is_unique_violation, StoreContext, StoreError};
use crate::domain::{Account, DomainError, Person};

use super::credentials::SecretDigest;

/// Data needed to register a person
#[derive(Debug, Clone)]
pub struct Registration {
    pub login: String,
    pub secret: String,
    pub full_name: Option<String>,
    pub surname: Option<String>,
    pub name: Option<String>,
}

impl Registration {
    pub fn new(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            secret: secret.into(),
            full_name: None,
            surname: None,
            name: None,
        }
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.login.trim().is_empty() {
            return Err(DomainError::InvalidInput("login must not be empty".to_string()));
        }
        if self.secret.is_empty() {
            return Err(DomainError::InvalidInput("password must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct PersonRow {
    id: i64,
    login: String,
    secret_hash: String,
    secret_salt: String,
    full_name: Option<String>,
    surname: Option<String>,
    name: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PersonRow> for Person {
    fn from(row: PersonRow) -> Self {
        Person {
            id: row.id,
            login: row.login,
            secret_hash: row.secret_hash,
            secret_salt: row.secret_salt,
            full_name: row.full_name,
            surname: row.surname,
            name: row.name,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    person_id: Option<i64>,
    number: String,
    sign: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: row.id,
            person_id: row.person_id,
            number: row.number,
            sign: decode_column(&row.sign)?,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_accounts(rows: Vec<AccountRow>) -> Result<Vec<Account>, StoreError> {
    rows.into_iter().map(Account::try_from).collect()
}

/// Directory of persons and accounts
#[derive(Debug, Clone)]
pub struct AccountDirectory {
    pool: PgPool,
    ledger: LedgerConfig,
}

impl AccountDirectory {
    pub fn new(pool: PgPool, ledger: LedgerConfig) -> Self {
        Self { pool, ledger }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Create a person together with their first account, atomically.
    ///
    /// A unique violation on either row (login, or a clashing account number)
    /// rolls the whole registration back and reports `UserExists`.
    pub async fn register(
        &self,
        registration: Registration,
    ) -> Result<(Person, Account), StoreError> {
        registration.validate()?;

        let login = registration.login.trim().to_string();
        let digest = SecretDigest::new(&registration.secret);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("opening registration transaction")?;

        let person: Person = sqlx::query_as::<_, PersonRow>(
            r#"
            INSERT INTO person (login, secret_hash, secret_salt, full_name, surname, name)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, login, secret_hash, secret_salt, full_name, surname, name,
                      status, created_at, updated_at
            "#,
        )
        .bind(&login)
        .bind(&digest.hash)
        .bind(&digest.salt)
        .bind(&registration.full_name)
        .bind(&registration.surname)
        .bind(&registration.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| registration_error("inserting person", &login, e))?
        .into();

        let serial: i64 = sqlx::query_scalar("SELECT nextval('account_number_seq')")
            .fetch_one(&mut *tx)
            .await
            .context("drawing account number")?;

        let account: Account = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO account (person_id, number, sign)
            VALUES ($1, $2, $3)
            RETURNING id, person_id, number, sign, status, created_at, updated_at
            "#,
        )
        .bind(person.id)
        .bind(self.ledger.account_number(serial))
        .bind(self.ledger.person_account_sign.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| registration_error("opening person account", &login, e))?
        .try_into()?;

        tx.commit().await.context("committing registration")?;

        tracing::info!(
            person_id = person.id,
            login = %person.login,
            account = %account.number,
            "Person registered"
        );

        Ok((person, account))
    }

    /// Resolve a login/secret pair to its person
    pub async fn authenticate(&self, login: &str, secret: &str) -> Result<Person, StoreError> {
        let row: Option<PersonRow> = sqlx::query_as(
            r#"
            SELECT id, login, secret_hash, secret_salt, full_name, surname, name,
                   status, created_at, updated_at
            FROM person
            WHERE login = $1
            "#,
        )
        .bind(login.trim())
        .fetch_optional(&self.pool)
        .await
        .context("looking up person by login")?;

        let person: Person = row.ok_or(DomainError::InvalidCredentials)?.into();

        let digest = SecretDigest {
            hash: person.secret_hash.clone(),
            salt: person.secret_salt.clone(),
        };
        if !digest.verify(secret) {
            tracing::debug!(login = %person.login, "Credential check failed");
            return Err(DomainError::InvalidCredentials.into());
        }

        Ok(person)
    }

    pub async fn person(&self, person_id: i64) -> Result<Person, StoreError> {
        let row: Option<PersonRow> = sqlx::query_as(
            r#"
            SELECT id, login, secret_hash, secret_salt, full_name, surname, name,
                   status, created_at, updated_at
            FROM person
            WHERE id = $1
            "#,
        )
        .bind(person_id)
        .fetch_optional(&self.pool)
        .await
        .context("looking up person by id")?;

        Ok(row.ok_or(DomainError::PersonNotFound(person_id))?.into())
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Accounts owned by a person, in creation order
    pub async fn accounts_of(&self, person_id: i64) -> Result<Vec<Account>, StoreError> {
        let mut conn = self.pool.acquire().await.context("acquiring connection")?;
        Self::accounts_of_with(&mut conn, person_id).await
    }

    pub async fn accounts_of_with(
        conn: &mut PgConnection,
        person_id: i64,
    ) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, person_id, number, sign, status, created_at, updated_at
            FROM account
            WHERE person_id = $1
            ORDER BY id
            "#,
        )
        .bind(person_id)
        .fetch_all(&mut *conn)
        .await
        .context("loading person accounts")?;

        into_accounts(rows)
    }

    /// Same as [`Self::accounts_of_with`], holding a row lock on every account
    /// until the surrounding transaction ends.
    pub async fn lock_accounts_of(
        conn: &mut PgConnection,
        person_id: i64,
    ) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, person_id, number, sign, status, created_at, updated_at
            FROM account
            WHERE person_id = $1
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(person_id)
        .fetch_all(&mut *conn)
        .await
        .context("locking person accounts")?;

        into_accounts(rows)
    }

    /// Every account opened before `cutoff`, system account included
    pub async fn accounts_opened_before(
        conn: &mut PgConnection,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, person_id, number, sign, status, created_at, updated_at
            FROM account
            WHERE created_at < $1
            ORDER BY id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *conn)
        .await
        .context("listing accounts to close")?;

        into_accounts(rows)
    }

    // =========================================================================
    // System clearing account
    // =========================================================================

    /// Open the shared clearing account. Run once per deployment at bootstrap;
    /// re-running returns the existing account.
    pub async fn create_system_account(&self) -> Result<Account, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO account (person_id, number, sign)
            VALUES (NULL, $1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&self.ledger.clearing_account_number)
        .bind(self.ledger.clearing_account_sign().as_str())
        .execute(&self.pool)
        .await
        .context("opening clearing account")?
        .rows_affected();

        let account = self.clearing_account().await?;

        if account.sign != self.ledger.clearing_account_sign() {
            return Err(StoreError::InvalidData(format!(
                "clearing account {} is {}, configuration expects {}",
                account.number,
                account.sign,
                self.ledger.clearing_account_sign()
            )));
        }

        if inserted > 0 {
            tracing::info!(
                account = %account.number,
                sign = %account.sign,
                "Clearing account opened"
            );
        }

        Ok(account)
    }

    pub async fn clearing_account(&self) -> Result<Account, StoreError> {
        let mut conn = self.pool.acquire().await.context("acquiring connection")?;
        Self::clearing_account_with(&mut conn, &self.ledger.clearing_account_number).await
    }

    pub async fn clearing_account_with(
        conn: &mut PgConnection,
        number: &str,
    ) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, person_id, number, sign, status, created_at, updated_at
            FROM account
            WHERE number = $1 AND person_id IS NULL
            "#,
        )
        .bind(number)
        .fetch_optional(&mut *conn)
        .await
        .context("loading clearing account")?;

        row.ok_or_else(|| {
            StoreError::InvalidData(format!("clearing account {} is not open", number))
        })?
        .try_into()
    }

}

/// Unique violations during registration mean the login (or its account) is taken
fn registration_error(context: &'static str, login: &str, err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        DomainError::UserExists(login.to_string()).into()
    } else {
        StoreError::from_sqlx(context, err)
    }
}
