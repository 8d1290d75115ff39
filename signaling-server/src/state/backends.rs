#[cfg(feature = "postgres")]
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

#[cfg(feature = "postgres")]
use super::registry::RegistryEntry;

/// Backend state (optional durable registry)
pub struct BackendState {
    #[cfg(feature = "postgres")]
    pub db: Option<PgPool>,
}

impl BackendState {
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "postgres")]
            db: None,
        }
    }
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "postgres")]
pub async fn connect_db(db_url: &str) -> Result<PgPool, String> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .map_err(|e| format!("connect: {}", e))?;
    init_db(&pool).await?;
    Ok(pool)
}

#[cfg(feature = "postgres")]
async fn init_db(pool: &PgPool) -> Result<(), String> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reservations (
          address TEXT PRIMARY KEY,
          nickname TEXT NOT NULL,
          expires_at TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| format!("init_db reservations: {}", e))?;
    Ok(())
}

#[cfg(feature = "postgres")]
pub async fn upsert_reservation_db(pool: &PgPool, entry: &RegistryEntry) -> Result<(), String> {
    sqlx::query(
        r#"
        INSERT INTO reservations (address, nickname, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (address) DO UPDATE
        SET nickname = EXCLUDED.nickname,
            expires_at = EXCLUDED.expires_at;
        "#,
    )
    .bind(&entry.address)
    .bind(&entry.nickname)
    .bind(entry.expires_at)
    .execute(pool)
    .await
    .map_err(|e| format!("upsert_reservation_db: {}", e))?;
    Ok(())
}

#[cfg(feature = "postgres")]
pub async fn delete_reservation_db(pool: &PgPool, address: &str) -> Result<(), String> {
    sqlx::query("DELETE FROM reservations WHERE address = $1")
        .bind(address)
        .execute(pool)
        .await
        .map_err(|e| format!("delete_reservation_db: {}", e))?;
    Ok(())
}

#[cfg(feature = "postgres")]
pub async fn delete_expired_db(pool: &PgPool) -> Result<u64, String> {
    let result = sqlx::query("DELETE FROM reservations WHERE expires_at <= NOW()")
        .execute(pool)
        .await
        .map_err(|e| format!("delete_expired_db: {}", e))?;
    Ok(result.rows_affected())
}

#[cfg(feature = "postgres")]
pub async fn load_reservations_db(pool: &PgPool) -> Result<Vec<RegistryEntry>, String> {
    let rows = sqlx::query(
        "SELECT address, nickname, expires_at FROM reservations WHERE expires_at > NOW()",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| format!("load_reservations_db: {}", e))?;

    rows.into_iter()
        .map(|row| {
            Ok(RegistryEntry {
                address: row.try_get("address").map_err(|e| e.to_string())?,
                nickname: row.try_get("nickname").map_err(|e| e.to_string())?,
                expires_at: row.try_get("expires_at").map_err(|e| e.to_string())?,
            })
        })
        .collect()
}
