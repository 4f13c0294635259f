//! risk-engine 与 dispute-responder 共用的 PostgreSQL 连接池
//!
//! 两个服务都在启动时执行 `migrations/` 下的迁移，风险状态表与建议表在同一个库中。

use crate::config::DatabaseConfig;
use crate::error::{PipelineError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip_all, fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;
        info!("数据库连接池就绪");
        Ok(Self { pool })
    }

    /// 存储层各自持有池的克隆
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 迁移器持有 advisory lock，两个服务同时启动时只有一个真正执行
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PipelineError::Database(e.into()))?;
        info!("迁移完成");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_database_config;

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_migrations_are_idempotent() {
        let db = Database::connect(&test_database_config()).await.unwrap();
        db.run_migrations().await.unwrap();
        db.run_migrations().await.unwrap();

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_name IN ('risk_scores', 'dispute_recommendations')",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(tables, 2);
        db.close().await;
    }
}
