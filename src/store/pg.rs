//! Production store backend: documents live in Postgres (one JSONB table),
//! change notification fans out over Redis pub/sub. Watchers re-fetch the
//! committed row on every notification, so each subscription observes
//! statuses in commit order for its document.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use super::{DocEvent, DocWatch, Document, DocumentStore, QueryWatch, Watch};

pub struct PgStore {
    pool: PgPool,
    redis: redis::Client,
    publisher: redis::aio::MultiplexedConnection,
}

impl PgStore {
    pub async fn connect(database_url: &str, redis_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        ensure_schema(&pool).await?;

        let redis = redis::Client::open(redis_url)?;
        let publisher = redis.get_multiplexed_async_connection().await?;

        Ok(Self {
            pool,
            redis,
            publisher,
        })
    }

    /// The seed tool needs raw SQL access for wiping collections.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn channel(collection: &str) -> String {
        format!("store:{collection}")
    }

    async fn publish(&self, collection: &str, id: Uuid) {
        let mut conn = self.publisher.clone();
        if let Err(e) = conn
            .publish::<_, _, ()>(Self::channel(collection), id.to_string())
            .await
        {
            warn!("Store change notification failed for {collection}/{id}: {e}");
        }
    }

    async fn fetch(pool: &PgPool, collection: &str, id: Uuid) -> anyhow::Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>(
            "SELECT id, created_at, data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(doc)
    }

    async fn query(
        pool: &PgPool,
        collection: &str,
        filter: &Value,
    ) -> anyhow::Result<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            "SELECT id, created_at, data FROM documents
             WHERE collection = $1 AND data @> $2
             ORDER BY created_at",
        )
        .bind(collection)
        .bind(filter)
        .fetch_all(pool)
        .await?;
        Ok(docs)
    }
}

/// Idempotent schema provisioning, run on every startup.
async fn ensure_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS documents (
            collection  TEXT NOT NULL,
            id          UUID NOT NULL,
            data        JSONB NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (collection, id)
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::raw_sql(
        "CREATE INDEX IF NOT EXISTS documents_data_idx
         ON documents USING GIN (data jsonb_path_ops)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, collection: &str, id: Uuid) -> anyhow::Result<Option<Document>> {
        Self::fetch(&self.pool, collection, id).await
    }

    async fn list(&self, collection: &str, filter: &Value) -> anyhow::Result<Vec<Document>> {
        Self::query(&self.pool, collection, filter).await
    }

    async fn create(&self, collection: &str, data: Value) -> anyhow::Result<Document> {
        let doc = sqlx::query_as::<_, Document>(
            "INSERT INTO documents (collection, id, data)
             VALUES ($1, $2, $3)
             RETURNING id, created_at, data",
        )
        .bind(collection)
        .bind(Uuid::new_v4())
        .bind(&data)
        .fetch_one(&self.pool)
        .await?;

        self.publish(collection, doc.id).await;
        Ok(doc)
    }

    async fn merge(
        &self,
        collection: &str,
        id: Uuid,
        patch: Value,
    ) -> anyhow::Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>(
            "UPDATE documents SET data = data || $3, updated_at = NOW()
             WHERE collection = $1 AND id = $2
             RETURNING id, created_at, data",
        )
        .bind(collection)
        .bind(id)
        .bind(&patch)
        .fetch_optional(&self.pool)
        .await?;

        if doc.is_some() {
            self.publish(collection, id).await;
        }
        Ok(doc)
    }

    async fn watch_doc(&self, collection: &str, id: Uuid) -> anyhow::Result<DocWatch> {
        let channel = Self::channel(collection);
        let mut pubsub = self.redis.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        let pool = self.pool.clone();
        let collection = collection.to_string();
        let (tx, rx) = mpsc::channel(16);

        // Subscribed before the initial snapshot, so no change between the
        // two is lost; a spurious duplicate snapshot is harmless.
        let task = tokio::spawn(async move {
            match Self::fetch(&pool, &collection, id).await {
                Ok(Some(doc)) => {
                    if tx.send(DocEvent::Snapshot(doc)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    if tx.send(DocEvent::NotFound).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Watch on {collection}/{id} broke during initial read: {e}");
                    return;
                }
            }

            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if payload != id.to_string() {
                    continue;
                }
                match Self::fetch(&pool, &collection, id).await {
                    Ok(Some(doc)) => {
                        if tx.send(DocEvent::Snapshot(doc)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        if tx.send(DocEvent::NotFound).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Watch on {collection}/{id} broke: {e}");
                        return;
                    }
                }
            }
        });

        Ok(Watch::new(rx, task))
    }

    async fn watch_matching(&self, collection: &str, filter: Value) -> anyhow::Result<QueryWatch> {
        let channel = Self::channel(collection);
        let mut pubsub = self.redis.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        let pool = self.pool.clone();
        let collection = collection.to_string();
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            match Self::query(&pool, &collection, &filter).await {
                Ok(docs) => {
                    if tx.send(docs).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Query watch on {collection} broke during initial read: {e}");
                    return;
                }
            }

            let mut stream = pubsub.on_message();
            while stream.next().await.is_some() {
                match Self::query(&pool, &collection, &filter).await {
                    Ok(docs) => {
                        if tx.send(docs).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Query watch on {collection} broke: {e}");
                        return;
                    }
                }
            }
        });

        Ok(Watch::new(rx, task))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
