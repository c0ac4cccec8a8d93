//! Append-only loading of normalized rows

use crate::models::NormalizedRow;
use crate::warehouse::Warehouse;
use crate::Result;
use tracing::info;

/// Writes rows into one fixed `schema.table` destination
#[derive(Debug)]
pub struct Loader<W> {
    warehouse: W,
    schema: String,
    table: String,
    schema_ready: bool,
}

impl<W: Warehouse> Loader<W> {
    pub fn new(warehouse: W, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            warehouse,
            schema: schema.into(),
            table: table.into(),
            schema_ready: false,
        }
    }

    /// Ensure the destination schema exists
    pub async fn prepare(&mut self) -> Result<()> {
        self.warehouse.ensure_schema(&self.schema).await?;
        self.schema_ready = true;
        Ok(())
    }

    /// Append `rows`, ensuring the schema first if that has not happened yet
    pub async fn load(&mut self, rows: &[NormalizedRow]) -> Result<u64> {
        if !self.schema_ready {
            self.prepare().await?;
        }

        let written = self
            .warehouse
            .append_rows(rows, &self.schema, &self.table)
            .await?;
        info!(rows = written, "Inserted into {}", self.target());
        Ok(written)
    }

    /// `schema.table` as shown in logs
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::MemoryWarehouse;
    use crate::LoadError;
    use serde_json::json;

    fn row() -> NormalizedRow {
        let mut row = NormalizedRow::new();
        row.insert("location_name".into(), json!("Lagos"));
        row
    }

    #[tokio::test]
    async fn test_load_ensures_schema_before_first_append() {
        let warehouse = MemoryWarehouse::strict().with_table("weather", "current", &[]);
        let mut loader = Loader::new(warehouse, "weather", "current");

        assert_eq!(loader.load(&[row()]).await.unwrap(), 1);
        assert_eq!(loader.warehouse().ensure_calls(), 1);

        loader.load(&[row()]).await.unwrap();
        assert_eq!(loader.warehouse().ensure_calls(), 1);
        assert_eq!(loader.warehouse().rows("weather", "current").len(), 2);
    }

    #[tokio::test]
    async fn test_prepare_then_load_does_not_repeat_ensure() {
        let mut loader = Loader::new(MemoryWarehouse::new(), "weather", "current");
        loader.prepare().await.unwrap();
        loader.load(&[row()]).await.unwrap();
        assert_eq!(loader.warehouse().ensure_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_table_is_insert_error() {
        let mut loader = Loader::new(MemoryWarehouse::strict(), "weather", "current");
        let err = loader.load(&[row()]).await.unwrap_err();
        assert!(matches!(err, LoadError::Insert { .. }));
        assert_eq!(loader.target(), "weather.current");
    }
}
