use chrono::NaiveDate;
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use dashboard_core::types::{Customer, CustomerSummary, Invoice, InvoiceStatus};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens a pool of at most five connections.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        Self::connect_with(database_url, 5).await
    }

    pub async fn connect_with(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to operate on invoices.
    pub fn invoices(&self) -> InvoiceRepository {
        InvoiceRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on customers.
    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for looking up dashboard users.
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
}

/// Errors surfaced by the entity repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("stored row could not be decoded: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Statement outcome for keyed updates and deletes.
///
/// Zero affected rows is reported, not treated as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affected(pub u64);

impl Affected {
    pub fn is_noop(self) -> bool {
        self.0 == 0
    }
}

/// Data required to insert an invoice; the id is generated on insert.
pub struct NewInvoice<'a> {
    pub customer_id: &'a str,
    pub amount_in_cents: i64,
    pub status: InvoiceStatus,
    pub date: NaiveDate,
}

/// Mutable invoice columns overwritten by an update.
pub struct InvoiceChanges<'a> {
    pub customer_id: &'a str,
    pub amount_in_cents: i64,
    pub status: InvoiceStatus,
}

/// Repository responsible for the `invoices` table.
#[derive(Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    /// Inserts a new invoice and returns its generated id.
    pub async fn insert(&self, invoice: &NewInvoice<'_>) -> Result<String, RepositoryError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO invoices (id, customer_id, amount, status, date) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(invoice.customer_id)
        .bind(invoice.amount_in_cents)
        .bind(invoice.status.as_str())
        .bind(invoice.date)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Overwrites customer, amount and status for the invoice matching `id`.
    pub async fn update(
        &self,
        id: &str,
        changes: &InvoiceChanges<'_>,
    ) -> Result<Affected, RepositoryError> {
        let result = sqlx::query(
            "UPDATE invoices SET customer_id = ?, amount = ?, status = ? WHERE id = ?",
        )
        .bind(changes.customer_id)
        .bind(changes.amount_in_cents)
        .bind(changes.status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(Affected(result.rows_affected()))
    }

    pub async fn delete(&self, id: &str) -> Result<Affected, RepositoryError> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(Affected(result.rows_affected()))
    }

    /// Loads a single invoice, used to populate the edit form.
    pub async fn fetch_by_id(&self, id: &str) -> Result<Option<Invoice>, RepositoryError> {
        let row = sqlx::query_as::<_, InvoiceRow>(
            "SELECT id, customer_id, amount, status, date FROM invoices WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(InvoiceRow::into_domain).transpose()
    }
}

/// Raw `invoices` row.
#[derive(Debug, sqlx::FromRow)]
pub struct InvoiceRow {
    pub id: String,
    pub customer_id: String,
    pub amount: i64,
    pub status: String,
    pub date: NaiveDate,
}

impl InvoiceRow {
    pub fn into_domain(self) -> Result<Invoice, RepositoryError> {
        let status = self
            .status
            .parse::<InvoiceStatus>()
            .map_err(|err| RepositoryError::Decode(err.to_string()))?;
        Ok(Invoice {
            id: self.id,
            customer_id: self.customer_id,
            amount: self.amount,
            status,
            date: self.date,
        })
    }
}

/// Data required to insert a customer; the id is generated on insert.
pub struct NewCustomer<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub image_url: &'a str,
}

/// Repository responsible for the `customers` table.
#[derive(Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Inserts a new customer and returns its generated id.
    pub async fn insert(&self, customer: &NewCustomer<'_>) -> Result<String, RepositoryError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO customers (id, name, email, image_url) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(customer.name)
            .bind(customer.email)
            .bind(customer.image_url)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    /// Overwrites name and email for the customer matching `id`.
    pub async fn update(
        &self,
        id: &str,
        name: &str,
        email: &str,
    ) -> Result<Affected, RepositoryError> {
        let result = sqlx::query("UPDATE customers SET name = ?, email = ? WHERE id = ?")
            .bind(name)
            .bind(email)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(Affected(result.rows_affected()))
    }

    pub async fn delete(&self, id: &str) -> Result<Affected, RepositoryError> {
        let result = sqlx::query("DELETE FROM customers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(Affected(result.rows_affected()))
    }

    pub async fn fetch_by_id(&self, id: &str) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "SELECT id, name, email, image_url FROM customers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CustomerRow::into_domain))
    }

    /// Lists every customer ordered by name, for the invoice form's picker.
    pub async fn list_summaries(&self) -> Result<Vec<CustomerSummary>, RepositoryError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT id, name FROM customers ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| CustomerSummary { id, name })
            .collect())
    }
}

/// Raw `customers` row.
#[derive(Debug, sqlx::FromRow)]
pub struct CustomerRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub image_url: String,
}

impl CustomerRow {
    pub fn into_domain(self) -> Customer {
        Customer {
            id: self.id,
            name: self.name,
            email: self.email,
            image_url: self.image_url,
        }
    }
}

/// Dashboard user with the stored password hash.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Data required to insert a user; `password_hash` must already be hashed.
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

/// Repository used by the credentials identity provider.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, email, password FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn insert(&self, user: &NewUser<'_>) -> Result<String, RepositoryError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, name, email, password) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(user.name)
            .bind(user.email)
            .bind(user.password_hash)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }
}
