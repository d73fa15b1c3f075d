use sqlx::{Row, Sqlite, SqlitePool, Transaction};

#[async_trait::async_trait]
pub trait Table {
    type Record<'a>;

    fn get_name(&self) -> &str;
    fn get_pool(&self) -> &SqlitePool;

    async fn create(&self) -> Result<(), sqlx::Error>;
    async fn insert<'a>(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: Self::Record<'a>,
    ) -> Result<(), sqlx::Error>;

    async fn clear(&self, tx: &mut Transaction<'_, Sqlite>) -> Result<(), sqlx::Error> {
        let query = format!("DELETE FROM {}", self.get_name());
        sqlx::query(&query).execute(&mut *tx).await?;
        Ok(())
    }

    async fn count(&self) -> Result<u32, sqlx::Error> {
        let query = format!("SELECT COUNT(*) FROM {}", self.get_name());
        Ok(sqlx::query(&query)
            .fetch_one(self.get_pool())
            .await?
            .try_get(0)?)
    }
}
