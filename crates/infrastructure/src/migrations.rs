use sqlx::migrate::Migrator;

/// 内置的建表迁移，只在 `database.run_migrations` 打开时执行
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
