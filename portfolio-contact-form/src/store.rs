use crate::validation::Submission;
use async_once_cell::OnceCell;
use sqlx::{any::install_default_drivers, AnyConnection, Connection};
use thiserror::Error;
use tracing::{info, warn};

const CREATE_TABLE_MYSQL: &str = r#"
    CREATE TABLE IF NOT EXISTS contacts (
        id INT AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(100),
        email VARCHAR(100),
        subject VARCHAR(200),
        message TEXT,
        submitted_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
"#;

const CREATE_TABLE_SQLITE: &str = r#"
    CREATE TABLE IF NOT EXISTS contacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name VARCHAR(100),
        email VARCHAR(100),
        subject VARCHAR(200),
        message TEXT,
        submitted_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
"#;

const INSERT_CONTACT: &str =
    "INSERT INTO contacts (name, email, subject, message) VALUES (?, ?, ?, ?)";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Appends submissions to the `contacts` table.
///
/// Every call opens its own connection and closes it before returning, on success and failure
/// alike. The table is created on first use.
pub struct ContactStore {
    url: String,
    table_ready: OnceCell<()>,
}

impl ContactStore {
    pub fn new(url: impl Into<String>) -> Self {
        install_default_drivers();
        Self {
            url: url.into(),
            table_ready: Default::default(),
        }
    }

    pub async fn record(&self, submission: &Submission) -> Result<(), StoreError> {
        let mut connection = AnyConnection::connect(&self.url).await?;
        let result = self.insert(&mut connection, submission).await;
        close(connection).await;
        result
    }

    async fn insert(
        &self,
        connection: &mut AnyConnection,
        submission: &Submission,
    ) -> Result<(), StoreError> {
        self.table_ready
            .get_or_try_init(ensure_table(connection))
            .await?;
        // Dropping the transaction without committing rolls it back.
        let mut transaction = connection.begin().await?;
        sqlx::query(INSERT_CONTACT)
            .bind(submission.name.as_str())
            .bind(submission.email.as_str())
            .bind(submission.subject.as_str())
            .bind(submission.message.as_str())
            .execute(&mut *transaction)
            .await?;
        transaction.commit().await?;
        info!("Stored contact form submission from {}", submission.email);
        Ok(())
    }
}

async fn close(connection: AnyConnection) {
    if let Err(error) = connection.close().await {
        warn!("Error closing database connection: {error}");
    }
}

/// Creates the `contacts` table unless it already exists.
pub async fn ensure_table(connection: &mut AnyConnection) -> Result<(), StoreError> {
    let statement = if connection.backend_name().eq_ignore_ascii_case("mysql") {
        CREATE_TABLE_MYSQL
    } else {
        CREATE_TABLE_SQLITE
    };
    sqlx::query(statement).execute(&mut *connection).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ensure_table, ContactStore};
    use crate::validation::Submission;
    use googletest::prelude::*;
    use sqlx::{any::install_default_drivers, AnyConnection, Connection};
    use tempfile::TempDir;

    fn submission() -> Submission {
        Submission {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            subject: "Analytical engines".into(),
            message: "Robert'); DROP TABLE contacts;--".into(),
        }
    }

    fn database_url(directory: &TempDir) -> String {
        format!(
            "sqlite://{}?mode=rwc",
            directory.path().join("contacts.db").display()
        )
    }

    #[tokio::test]
    async fn creating_table_twice_succeeds() -> Result<()> {
        install_default_drivers();
        let directory = TempDir::new().unwrap();
        let mut connection = AnyConnection::connect(&database_url(&directory))
            .await
            .unwrap();

        verify_that!(ensure_table(&mut connection).await, ok(anything()))?;
        verify_that!(ensure_table(&mut connection).await, ok(anything()))?;
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'contacts'",
        )
        .fetch_one(&mut connection)
        .await
        .unwrap();
        verify_that!(tables, eq(1))
    }

    #[tokio::test]
    async fn records_submission_with_bound_parameters() -> Result<()> {
        let directory = TempDir::new().unwrap();
        let store = ContactStore::new(database_url(&directory));

        verify_that!(store.record(&submission()).await, ok(anything()))?;

        let mut connection = AnyConnection::connect(&database_url(&directory))
            .await
            .unwrap();
        let row: (String, String, String, String) =
            sqlx::query_as("SELECT name, email, subject, message FROM contacts")
                .fetch_one(&mut connection)
                .await
                .unwrap();
        verify_that!(
            row,
            eq((
                "Ada Lovelace".to_string(),
                "ada@example.com".to_string(),
                "Analytical engines".to_string(),
                "Robert'); DROP TABLE contacts;--".to_string(),
            ))
        )
    }

    #[tokio::test]
    async fn assigns_identifier_and_timestamp() -> Result<()> {
        let directory = TempDir::new().unwrap();
        let store = ContactStore::new(database_url(&directory));
        store.record(&submission()).await.unwrap();
        store.record(&submission()).await.unwrap();

        let mut connection = AnyConnection::connect(&database_url(&directory))
            .await
            .unwrap();
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM contacts WHERE submitted_at IS NOT NULL ORDER BY id",
        )
        .fetch_all(&mut connection)
        .await
        .unwrap();
        verify_that!(ids, elements_are![eq(1), eq(2)])
    }

    #[tokio::test]
    async fn reports_unreachable_database() -> Result<()> {
        let directory = TempDir::new().unwrap();
        let store = ContactStore::new(format!(
            "sqlite://{}",
            directory.path().join("missing").join("contacts.db").display()
        ));

        verify_that!(
            store.record(&submission()).await,
            err(displays_as(starts_with("Database error")))
        )
    }
}
