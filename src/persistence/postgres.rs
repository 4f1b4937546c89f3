use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::error::Error;
use crate::models::{Direction, TradeRecord};
use crate::persistence::TradeStore;
use crate::Result;

/// Postgres trade log (`trade_records` table)
pub struct PostgresTradeStore {
    pool: PgPool,
}

impl PostgresTradeStore {
    /// Connect to Postgres and run pending migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres trade store");

        Ok(Self { pool })
    }
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::Persistence(format!("{} {} out of range", field, value)))
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s {
        "LONG" => Ok(Direction::Long),
        "SHORT" => Ok(Direction::Short),
        other => Err(Error::Persistence(format!("unknown direction '{}'", other))),
    }
}

impl TradeStore for PostgresTradeStore {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_records (
                trade_id, strategy, direction, entry_price, exit_price, entry_time, exit_time,
                stop_loss, initial_stop, risk, pnl, pnl_pct, r_multiple, exit_reason,
                is_win, max_trail_reached, duration_minutes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (trade_id) DO UPDATE SET
                exit_price = EXCLUDED.exit_price,
                exit_time = EXCLUDED.exit_time,
                stop_loss = EXCLUDED.stop_loss,
                pnl = EXCLUDED.pnl,
                pnl_pct = EXCLUDED.pnl_pct,
                r_multiple = EXCLUDED.r_multiple,
                exit_reason = EXCLUDED.exit_reason,
                is_win = EXCLUDED.is_win,
                max_trail_reached = EXCLUDED.max_trail_reached,
                duration_minutes = EXCLUDED.duration_minutes
            "#,
        )
        .bind(to_i64(record.trade_id, "trade_id")?)
        .bind(&record.strategy)
        .bind(record.direction.to_string())
        .bind(record.entry_price)
        .bind(record.exit_price)
        .bind(record.entry_time)
        .bind(record.exit_time)
        .bind(record.stop_loss)
        .bind(record.initial_stop)
        .bind(record.risk)
        .bind(record.pnl)
        .bind(record.pnl_pct)
        .bind(record.r_multiple)
        .bind(record.exit_reason.to_string())
        .bind(record.is_win)
        .bind(record.max_trail_reached as i32)
        .bind(record.duration_minutes)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved trade #{} to Postgres", record.trade_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT trade_id, strategy, direction, entry_price, exit_price, entry_time, exit_time,
                   stop_loss, initial_stop, risk, pnl, pnl_pct, r_multiple, exit_reason,
                   is_win, max_trail_reached, duration_minutes
            FROM trade_records
            ORDER BY trade_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TradeRecord> {
                let trade_id: i64 = row.try_get("trade_id")?;
                let direction: String = row.try_get("direction")?;
                let exit_reason: String = row.try_get("exit_reason")?;
                let max_trail: i32 = row.try_get("max_trail_reached")?;

                Ok(TradeRecord {
                    trade_id: u64::try_from(trade_id)
                        .map_err(|_| Error::Persistence(format!("negative trade_id {}", trade_id)))?,
                    strategy: row.try_get("strategy")?,
                    direction: parse_direction(&direction)?,
                    entry_price: row.try_get("entry_price")?,
                    exit_price: row.try_get("exit_price")?,
                    entry_time: row.try_get("entry_time")?,
                    exit_time: row.try_get("exit_time")?,
                    stop_loss: row.try_get("stop_loss")?,
                    initial_stop: row.try_get("initial_stop")?,
                    risk: row.try_get("risk")?,
                    pnl: row.try_get("pnl")?,
                    pnl_pct: row.try_get("pnl_pct")?,
                    r_multiple: row.try_get("r_multiple")?,
                    exit_reason: exit_reason.parse()?,
                    is_win: row.try_get("is_win")?,
                    max_trail_reached: u32::try_from(max_trail).unwrap_or(0),
                    duration_minutes: row.try_get("duration_minutes")?,
                })
            })
            .collect()
    }

    async fn next_id(&self) -> Result<u64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(trade_id) FROM trade_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.map_or(1, |m| m.max(0) as u64 + 1))
    }
}
