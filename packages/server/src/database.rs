use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Schema,
    sea_query::{PostgresQueryBuilder, SqliteQueryBuilder},
};
use tracing::info;

use crate::entity::file_record;

pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    // SQLite serializes writers anyway; a single connection keeps the
    // per-record transactions from failing with SQLITE_BUSY.
    let max_connections = if db_url.starts_with("sqlite:") { 1 } else { 100 };

    opt.max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    create_tables(&db).await?;
    ensure_indexes(&db).await?;

    info!(backend = ?db.get_database_backend(), "Metadata store ready");
    Ok(db)
}

async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let mut stmt = schema.create_table_from_entity(file_record::Entity);
    stmt.if_not_exists();

    let sql = match backend {
        DatabaseBackend::Postgres => stmt.to_string(PostgresQueryBuilder),
        DatabaseBackend::Sqlite => stmt.to_string(SqliteQueryBuilder),
        other => {
            return Err(DbErr::Custom(format!(
                "unsupported database backend: {other:?}"
            )));
        }
    };
    db.execute_unprepared(&sql).await?;
    Ok(())
}

/// Indexes the entity definition cannot express.
///
/// The partial unique index is what makes an owner INSERT the duplicate
/// check: at most one record with `link_target = 0` may exist per hash.
async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute_unprepared(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_file_record_owner_hash \
         ON file_record (content_hash) WHERE link_target = 0",
    )
    .await?;
    db.execute_unprepared(
        "CREATE INDEX IF NOT EXISTS idx_file_record_link_target \
         ON file_record (link_target)",
    )
    .await?;
    Ok(())
}
