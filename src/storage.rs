//! Реляционное хранилище таблиц пайплайна (SQLite через sqlx).
//!
//! Запись двухуровневая: сначала пакетная вставка в одной транзакции,
//! при ее сбое - построчная вставка в новой транзакции. Ошибка наружу
//! уходит, только если не сработали оба пути. Все колонки хранятся как
//! TEXT, поэтому при чтении значения возвращаются строками.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};

use crate::error::{Error, Result};
use crate::types::{Table, Value};

/// Лимит bind-параметров на один INSERT (SQLITE_MAX_VARIABLE_NUMBER старых сборок)
pub const MAX_BIND_PARAMS: usize = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Удалить и пересоздать отношение
    Replace,
    /// Дописать строки, создав отношение при отсутствии
    Append,
}

/// Каким путем таблица была записана
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePath {
    Bulk,
    RowByRow,
}

#[derive(Debug, Clone)]
pub struct SqlStorage {
    pool: SqlitePool,
    max_bind_params: usize,
}

impl SqlStorage {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Стадии выполняются последовательно; одно соединение нужно и для `sqlite::memory:`
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            max_bind_params: MAX_BIND_PARAMS,
        })
    }

    /// Лимит параметров пакетного INSERT. Строку шире лимита пакетом
    /// не записать, такие таблицы уходят на построчный путь.
    pub fn with_max_bind_params(mut self, max_bind_params: usize) -> Self {
        self.max_bind_params = max_bind_params.max(1);
        self
    }

    pub async fn read(&self, relation: &str) -> Result<Table> {
        validate_relation(relation)?;

        let rows = sqlx::query(&format!("SELECT * FROM {}", quote_ident(relation)))
            .fetch_all(&self.pool)
            .await?;

        let columns: Vec<String> = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(relation)))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| r.try_get::<String, _>("name"))
            .collect::<std::result::Result<_, _>>()?;

        let mut table = Table::new(columns);
        let width = table.columns().len();
        for row in &rows {
            table.push_row((0..width).map(|i| decode(row, i)).collect())?;
        }

        tracing::info!("Read {} rows from '{}'", table.len(), relation);
        Ok(table)
    }

    pub async fn write(&self, table: &Table, relation: &str, mode: WriteMode) -> Result<WritePath> {
        validate_relation(relation)?;
        if table.columns().is_empty() {
            return Err(Error::EmptyInput(format!("table for '{}' has no columns", relation)));
        }

        let bulk = match self.write_via(WritePath::Bulk, table, relation, mode).await {
            Ok(()) => {
                tracing::info!("Saved {} rows to '{}' (bulk)", table.len(), relation);
                return Ok(WritePath::Bulk);
            }
            Err(e) => e,
        };

        tracing::warn!(
            "Bulk write to '{}' failed, falling back to row-by-row inserts: {}",
            relation,
            bulk
        );

        match self.write_via(WritePath::RowByRow, table, relation, mode).await {
            Ok(()) => {
                tracing::info!("Saved {} rows to '{}' (row-by-row)", table.len(), relation);
                Ok(WritePath::RowByRow)
            }
            Err(fallback) => Err(Error::StorageWrite {
                relation: relation.to_string(),
                bulk: bulk.to_string(),
                fallback: fallback.to_string(),
            }),
        }
    }

    /// Запись одним конкретным путем, без отката на другой
    pub async fn write_via(
        &self,
        path: WritePath,
        table: &Table,
        relation: &str,
        mode: WriteMode,
    ) -> std::result::Result<(), sqlx::Error> {
        let relation = quote_ident(relation);
        let columns = table
            .columns()
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>();

        let mut tx = self.pool.begin().await?;
        prepare_relation(&mut tx, &relation, &columns, mode).await?;

        match path {
            WritePath::Bulk => {
                if columns.len() > self.max_bind_params {
                    return Err(sqlx::Error::Protocol(format!(
                        "{} columns exceed the limit of {} bind parameters per statement",
                        columns.len(),
                        self.max_bind_params
                    )));
                }
                let chunk_rows = self.max_bind_params / columns.len();
                for chunk in table.rows().chunks(chunk_rows) {
                    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                        "INSERT INTO {} ({}) ",
                        relation,
                        columns.join(", ")
                    ));
                    builder.push_values(chunk, |mut b, row| {
                        for value in row {
                            b.push_bind(value.as_text());
                        }
                    });
                    builder.build().execute(&mut *tx).await?;
                }
            }
            WritePath::RowByRow => {
                let placeholders = vec!["?"; columns.len()].join(", ");
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    relation,
                    columns.join(", "),
                    placeholders
                );
                for row in table.rows() {
                    let mut query = sqlx::query(&sql);
                    for value in row {
                        query = query.bind(value.as_text());
                    }
                    query.execute(&mut *tx).await?;
                }
            }
        }

        tx.commit().await
    }
}

async fn prepare_relation(
    tx: &mut Transaction<'_, Sqlite>,
    relation: &str,
    columns: &[String],
    mode: WriteMode,
) -> std::result::Result<(), sqlx::Error> {
    if mode == WriteMode::Replace {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", relation))
            .execute(&mut **tx)
            .await?;
    }

    let ddl = columns
        .iter()
        .map(|c| format!("{} TEXT", c))
        .collect::<Vec<_>>()
        .join(", ");
    sqlx::query(&format!("CREATE TABLE IF NOT EXISTS {} ({})", relation, ddl))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn decode(row: &SqliteRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map_or(Value::Null, Value::Text);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map_or(Value::Null, Value::Int);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map_or(Value::Null, Value::Float);
    }
    Value::Null
}

fn validate_relation(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRelation(name.to_string()))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory() -> SqlStorage {
        SqlStorage::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_table(rows: usize) -> Table {
        let mut table = Table::new(["ORIGIN_AIRPORT", "ARRIVAL_DELAY", "FLIGHT_NUMBER"]);
        for i in 0..rows {
            table
                .push_row(vec![
                    Value::from("ATL"),
                    if i % 4 == 0 { Value::Null } else { Value::Float(i as f64 + 0.5) },
                    Value::Int(i as i64),
                ])
                .unwrap();
        }
        table
    }

    #[tokio::test]
    async fn round_trip_keeps_rows_and_columns() {
        let storage = memory().await;
        let table = sample_table(10);

        let path = storage
            .write(&table, "raw_flights", WriteMode::Replace)
            .await
            .unwrap();
        assert_eq!(path, WritePath::Bulk);

        let loaded = storage.read("raw_flights").await.unwrap();
        assert_eq!(loaded.len(), table.len());
        assert_eq!(loaded.columns(), table.columns());

        // Значения возвращаются строками, пустые остаются пустыми
        assert_eq!(loaded.value(1, 1), &Value::Text("1.5".to_string()));
        assert_eq!(loaded.value(0, 1), &Value::Null);
        assert_eq!(loaded.value(3, 2).as_f64(), Some(3.0));
    }

    #[tokio::test]
    async fn bulk_path_handles_many_chunks() {
        let storage = memory().await;
        let table = sample_table(1_000);
        storage
            .write(&table, "silver_flights", WriteMode::Replace)
            .await
            .unwrap();
        assert_eq!(storage.read("silver_flights").await.unwrap().len(), 1_000);
    }

    #[tokio::test]
    async fn replace_drops_previous_content() {
        let storage = memory().await;
        storage
            .write(&sample_table(5), "gold_features", WriteMode::Replace)
            .await
            .unwrap();

        let other = Table::new(["MONTH"]);
        storage
            .write(&other, "gold_features", WriteMode::Replace)
            .await
            .unwrap();

        let loaded = storage.read("gold_features").await.unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.columns(), &["MONTH".to_string()]);
    }

    #[tokio::test]
    async fn append_adds_rows() {
        let storage = memory().await;
        storage
            .write(&sample_table(3), "raw_flights", WriteMode::Append)
            .await
            .unwrap();
        storage
            .write(&sample_table(4), "raw_flights", WriteMode::Append)
            .await
            .unwrap();
        assert_eq!(storage.read("raw_flights").await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn row_by_row_path_writes_the_same_content() {
        let storage = memory().await;
        let table = sample_table(6);
        storage
            .write_via(WritePath::RowByRow, &table, "raw_flights", WriteMode::Replace)
            .await
            .unwrap();

        let loaded = storage.read("raw_flights").await.unwrap();
        assert_eq!(loaded.len(), 6);
        assert_eq!(loaded.value(5, 0), &Value::Text("ATL".to_string()));
    }

    #[tokio::test]
    async fn falls_back_to_row_by_row_when_bulk_fails() {
        // Три колонки не помещаются в два параметра на INSERT
        let storage = memory().await.with_max_bind_params(2);
        let table = sample_table(5);
        assert!(storage
            .write_via(WritePath::Bulk, &table, "raw_flights", WriteMode::Replace)
            .await
            .is_err());

        let path = storage
            .write(&table, "raw_flights", WriteMode::Replace)
            .await
            .unwrap();
        assert_eq!(path, WritePath::RowByRow);

        let loaded = storage.read("raw_flights").await.unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.columns(), table.columns());
        assert_eq!(loaded.value(0, 1), &Value::Null);
        assert_eq!(loaded.value(2, 1).as_f64(), Some(2.5));
        assert_eq!(loaded.value(4, 2).as_f64(), Some(4.0));
    }

    #[tokio::test]
    async fn failure_on_both_paths_is_surfaced() {
        let storage = memory().await;
        storage
            .write(&Table::new(["A"]), "target", WriteMode::Replace)
            .await
            .unwrap();

        // Отношение уже есть, но колонки B в нем нет
        let mut mismatched = Table::new(["B"]);
        mismatched.push_row(vec![Value::Int(1)]).unwrap();

        match storage.write(&mismatched, "target", WriteMode::Append).await {
            Err(Error::StorageWrite { relation, .. }) => assert_eq!(relation, "target"),
            other => panic!("expected storage error, got {:?}", other),
        }
        assert!(storage.read("target").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_unsafe_relation_names() {
        let storage = memory().await;
        let table = sample_table(1);
        for name in ["", "1abc", "raw flights", "x;DROP TABLE y"] {
            assert!(matches!(
                storage.write(&table, name, WriteMode::Replace).await,
                Err(Error::InvalidRelation(_))
            ));
        }
    }

    #[tokio::test]
    async fn reading_unknown_relation_fails() {
        let storage = memory().await;
        assert!(storage.read("missing").await.is_err());
    }
}
