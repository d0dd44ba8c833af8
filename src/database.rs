//! # 数据库模块
//!
//! 数据库连接和迁移管理

use crate::config::DatabaseConfig;
use crate::{ldebug, lerror, linfo, logging::{LogComponent, LogStage}, lwarn};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::path::Path;
use std::time::Duration;

/// 初始化数据库连接
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let database_url = config.url.as_str();
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "connect",
        "正在连接数据库",
        url = %database_url.chars().take(50).collect::<String>()
    );

    // 对于SQLite文件数据库，确保数据库文件的目录和文件存在
    if config.is_sqlite() && !config.is_memory_database() {
        ensure_sqlite_file(database_url)?;
    }

    let mut options = ConnectOptions::new(database_url.to_string());
    options
        .max_connections(config.max_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;

    linfo!("system", LogStage::Startup, LogComponent::Database, "connected", "数据库连接成功");
    Ok(db)
}

fn ensure_sqlite_file(database_url: &str) -> Result<(), DbErr> {
    let db_path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    let db_file_path = Path::new(db_path);

    if let Some(parent_dir) = db_file_path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            std::fs::create_dir_all(parent_dir).map_err(|e| {
                DbErr::Custom(format!(
                    "无法创建数据库目录 {}: {}",
                    parent_dir.display(),
                    e
                ))
            })?;
            linfo!(
                "system",
                LogStage::Startup,
                LogComponent::Database,
                "create_db_dir",
                &format!("数据库目录创建成功: {}", parent_dir.display())
            );
        }
    }

    if db_file_path.exists() {
        ldebug!(
            "system",
            LogStage::Startup,
            LogComponent::Database,
            "db_file_exists",
            &format!("数据库文件已存在: {}", db_file_path.display())
        );
    } else {
        std::fs::File::create(db_file_path).map_err(|e| {
            DbErr::Custom(format!(
                "无法创建数据库文件 {}: {}",
                db_file_path.display(),
                e
            ))
        })?;
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Database,
            "create_db_file",
            &format!("数据库文件创建成功: {}", db_file_path.display())
        );
    }
    Ok(())
}

/// 运行数据库迁移
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    let pending = ::migration::Migrator::get_pending_migrations(db).await?;
    if pending.is_empty() {
        ldebug!("system", LogStage::Startup, LogComponent::Database, "migrations_up_to_date", "所有迁移都已应用");
        return Ok(());
    }

    lwarn!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "pending_migrations",
        "存在待应用的迁移",
        pending = pending.len()
    );

    match ::migration::Migrator::up(db, None).await {
        Ok(()) => {
            linfo!("system", LogStage::Startup, LogComponent::Database, "migrations_done", "数据库迁移完成");
            Ok(())
        }
        Err(e) => {
            lerror!(
                "system",
                LogStage::Startup,
                LogComponent::Database,
                "migrations_failed",
                "数据库迁移失败",
                error = %e
            );
            Err(e)
        }
    }
}
