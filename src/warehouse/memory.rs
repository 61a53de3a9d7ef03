//! In-process warehouse used by tests and local dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    EnsureOutcome, Row, TableRef, TableSchema, Warehouse, WarehouseError, WritePolicy,
    creation_schema,
};

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub schema: TableSchema,
    pub rows: Vec<Row>,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: RwLock<HashMap<TableRef, MemoryTable>>,
    fail_loads: RwLock<Option<String>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn table(&self, target: &TableRef) -> Option<MemoryTable> {
        self.tables.read().await.get(target).cloned()
    }

    /// Pre-creates a table, as if it already existed in the warehouse.
    pub async fn insert_table(&self, target: TableRef, schema: TableSchema) {
        self.tables.write().await.insert(
            target,
            MemoryTable {
                schema,
                rows: Vec::new(),
            },
        );
    }

    /// Makes every subsequent load fail with `message`.
    pub async fn fail_loads_with(&self, message: impl Into<String>) {
        *self.fail_loads.write().await = Some(message.into());
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ensure_table(
        &self,
        target: &TableRef,
        schema_hint: Option<&TableSchema>,
        sample: Option<&Row>,
    ) -> Result<EnsureOutcome, WarehouseError> {
        let mut tables = self.tables.write().await;
        if tables.contains_key(target) {
            return Ok(EnsureOutcome::Existing);
        }

        let mut schema = creation_schema(target, schema_hint, sample)?;
        if schema.resolved_partition().is_none() {
            schema.partition_column = None;
        }
        tables.insert(
            target.clone(),
            MemoryTable {
                schema,
                rows: Vec::new(),
            },
        );
        Ok(EnsureOutcome::Created)
    }

    async fn load(
        &self,
        target: &TableRef,
        rows: &[Row],
        policy: WritePolicy,
    ) -> Result<u64, WarehouseError> {
        if let Some(message) = self.fail_loads.read().await.clone() {
            return Err(WarehouseError::JobFailed {
                job_id: format!("memory_{}", target.table),
                message,
            });
        }

        let mut tables = self.tables.write().await;
        let table = tables.get_mut(target).ok_or_else(|| WarehouseError::Api {
            status: 404,
            message: format!("Not found: Table {target}"),
        })?;
        if policy == WritePolicy::Replace {
            table.rows.clear();
        }
        table.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{ColumnSpec, ColumnType};
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn replace_truncates_and_append_accumulates() {
        let warehouse = MemoryWarehouse::new();
        let target = TableRef::new("marketing", "spend");
        let first = row(json!({"spend": 1.5}));

        warehouse
            .ensure_table(&target, None, Some(&first))
            .await
            .unwrap();
        warehouse
            .load(&target, &[first.clone(), first.clone()], WritePolicy::Append)
            .await
            .unwrap();
        warehouse
            .load(&target, &[first.clone()], WritePolicy::Append)
            .await
            .unwrap();
        assert_eq!(warehouse.table(&target).await.unwrap().rows.len(), 3);

        warehouse
            .load(&target, &[first], WritePolicy::Replace)
            .await
            .unwrap();
        assert_eq!(warehouse.table(&target).await.unwrap().rows.len(), 1);
    }

    #[tokio::test]
    async fn existing_table_keeps_its_schema() {
        let warehouse = MemoryWarehouse::new();
        let target = TableRef::new("marketing", "spend");
        let original = TableSchema::new(vec![ColumnSpec::new("spend", ColumnType::Numeric)]);
        warehouse.insert_table(target.clone(), original.clone()).await;

        let outcome = warehouse
            .ensure_table(&target, None, Some(&row(json!({"other": 1}))))
            .await
            .unwrap();

        assert_eq!(outcome, EnsureOutcome::Existing);
        assert_eq!(warehouse.table(&target).await.unwrap().schema, original);
    }
}
