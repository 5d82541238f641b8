use crate::errors::Result;
use crate::history::backend::{HistoryBackend, RecordKind};
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement, TransactionTrait,
};
use std::collections::HashMap;

/// Relational backend: one `(id VARCHAR(255) PRIMARY KEY, <payload> TEXT)`
/// table per collection, created on first use.
pub struct SqlBackend {
    db: DatabaseConnection,
}

impl SqlBackend {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let db = Database::connect(url).await?;
        Ok(Self::new(db))
    }

    fn backend(&self) -> DbBackend {
        self.db.get_database_backend()
    }

    fn quote(&self, ident: &str) -> String {
        let clean: String = ident
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        format!("\"{clean}\"")
    }

    fn create_sql(&self, table: &str, column: &str) -> String {
        format!("CREATE TABLE IF NOT EXISTS {table} (id VARCHAR(255) NOT NULL PRIMARY KEY, {column} TEXT)")
    }

    fn clear_sql(&self, table: &str) -> String {
        match self.backend() {
            DbBackend::Sqlite => format!("DELETE FROM {table}"),
            _ => format!("TRUNCATE TABLE {table}"),
        }
    }

    fn insert_sql(&self, table: &str, column: &str) -> String {
        match self.backend() {
            DbBackend::Postgres => format!("INSERT INTO {table} (id, {column}) VALUES ($1, $2)"),
            _ => format!("INSERT INTO {table} (id, {column}) VALUES (?, ?)"),
        }
    }
}

#[async_trait::async_trait]
impl HistoryBackend for SqlBackend {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn load(&self, collection: &str, kind: RecordKind) -> Result<HashMap<String, String>> {
        let backend = self.backend();
        let table = self.quote(collection);
        let column = kind.column();
        self.db
            .execute(Statement::from_string(backend, self.create_sql(&table, column)))
            .await?;
        let rows = self
            .db
            .query_all(Statement::from_string(
                backend,
                format!("SELECT id, {column} FROM {table}"),
            ))
            .await?;

        let mut records = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("", "id")?;
            let payload: Option<String> = row.try_get("", column)?;
            records.insert(id, payload.unwrap_or_default());
        }
        Ok(records)
    }

    async fn replace(
        &self,
        collection: &str,
        kind: RecordKind,
        records: &HashMap<String, String>,
    ) -> Result<usize> {
        let backend = self.backend();
        let table = self.quote(collection);
        let column = kind.column();

        // DDL outside the transaction
        self.db
            .execute(Statement::from_string(backend, self.create_sql(&table, column)))
            .await?;

        let txn = self.db.begin().await?;
        txn.execute(Statement::from_string(backend, self.clear_sql(&table)))
            .await?;
        let insert = self.insert_sql(&table, column);
        for (id, payload) in records {
            txn.execute(Statement::from_sql_and_values(
                backend,
                &insert,
                [id.clone().into(), payload.clone().into()],
            ))
            .await?;
        }
        txn.commit().await?;
        Ok(records.len())
    }
}
