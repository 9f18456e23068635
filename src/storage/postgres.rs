use crate::models::{Candle, TimeFrame};
use crate::storage::CandleStore;
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use postgres::{Client, NoTls, Row};

const SCHEMA_SQL: &str = include_str!("../../DB_SCHEMA.sql");

pub struct PostgresCandleStore {
    client: Client,
    symbol: String,
    interval: String,
}

impl PostgresCandleStore {
    pub fn connect(dsn: &str, symbol: impl Into<String>, timeframe: TimeFrame) -> Result<Self> {
        if timeframe.is_none() {
            return Err(Error::new("store requires a concrete time frame"));
        }
        let client = Client::connect(dsn, NoTls)
            .map_err(|err| Error::new(format!("postgres connect failed: {err}")))?;
        Ok(Self {
            client,
            symbol: symbol.into(),
            interval: timeframe.as_str().to_string(),
        })
    }

    pub fn ensure_schema(&mut self) -> Result<()> {
        for statement in split_statements(SCHEMA_SQL) {
            if statement.trim().is_empty() {
                continue;
            }
            self.client
                .batch_execute(&statement)
                .map_err(|err| Error::new(format!("schema execute failed: {err}")))?;
        }
        Ok(())
    }

    fn row_to_candle(row: &Row) -> Result<Candle> {
        let time: DateTime<Utc> = row.get(0);
        Ok(Candle {
            time: time.timestamp(),
            open: row.get(1),
            high: row.get(2),
            low: row.get(3),
            close: row.get(4),
            median: row.get(5),
            volume: row.get(6),
        })
    }
}

impl CandleStore for PostgresCandleStore {
    fn count(&mut self) -> Result<usize> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM candles WHERE symbol = $1 AND interval = $2",
                &[&self.symbol, &self.interval],
            )
            .map_err(|err| Error::new(format!("count query failed: {err}")))?;
        let count: i64 = row.get(0);
        Ok(count as usize)
    }

    fn count_at_or_before(&mut self, time: i64) -> Result<usize> {
        let cutoff = to_timestamp(time)?;
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM candles WHERE symbol = $1 AND interval = $2 AND time <= $3",
                &[&self.symbol, &self.interval, &cutoff],
            )
            .map_err(|err| Error::new(format!("count query failed: {err}")))?;
        let count: i64 = row.get(0);
        Ok(count as usize)
    }

    fn select_range(&mut self, offset: usize, count: usize) -> Result<Vec<Candle>> {
        let rows = self
            .client
            .query(
                "SELECT time, open, high, low, close, median, volume FROM candles \
                 WHERE symbol = $1 AND interval = $2 \
                 ORDER BY time ASC OFFSET $3 LIMIT $4",
                &[
                    &self.symbol,
                    &self.interval,
                    &(offset as i64),
                    &(count as i64),
                ],
            )
            .map_err(|err| Error::new(format!("range query failed: {err}")))?;
        rows.iter().map(Self::row_to_candle).collect()
    }

    fn newest(&mut self) -> Result<Option<Candle>> {
        let rows = self
            .client
            .query(
                "SELECT time, open, high, low, close, median, volume FROM candles \
                 WHERE symbol = $1 AND interval = $2 \
                 ORDER BY time DESC LIMIT 1",
                &[&self.symbol, &self.interval],
            )
            .map_err(|err| Error::new(format!("newest query failed: {err}")))?;
        rows.first().map(Self::row_to_candle).transpose()
    }

    fn oldest(&mut self) -> Result<Option<Candle>> {
        let rows = self
            .client
            .query(
                "SELECT time, open, high, low, close, median, volume FROM candles \
                 WHERE symbol = $1 AND interval = $2 \
                 ORDER BY time ASC LIMIT 1",
                &[&self.symbol, &self.interval],
            )
            .map_err(|err| Error::new(format!("oldest query failed: {err}")))?;
        rows.first().map(Self::row_to_candle).transpose()
    }

    fn upsert(&mut self, candle: &Candle) -> Result<()> {
        let time = to_timestamp(candle.time)?;
        self.client
            .execute(
                UPSERT_SQL,
                &[
                    &self.symbol,
                    &self.interval,
                    &time,
                    &candle.open,
                    &candle.high,
                    &candle.low,
                    &candle.close,
                    &candle.median,
                    &candle.volume,
                ],
            )
            .map_err(|err| Error::new(format!("upsert failed: {err}")))?;
        Ok(())
    }

    fn upsert_many(&mut self, candles: &[Candle]) -> Result<()> {
        if candles.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .client
            .transaction()
            .map_err(|err| Error::new(format!("db transaction failed: {err}")))?;
        let stmt = tx
            .prepare(UPSERT_SQL)
            .map_err(|err| Error::new(format!("prepare upsert failed: {err}")))?;
        for candle in candles {
            let time = to_timestamp(candle.time)?;
            tx.execute(
                &stmt,
                &[
                    &self.symbol,
                    &self.interval,
                    &time,
                    &candle.open,
                    &candle.high,
                    &candle.low,
                    &candle.close,
                    &candle.median,
                    &candle.volume,
                ],
            )
            .map_err(|err| Error::new(format!("upsert failed: {err}")))?;
        }
        tx.commit()
            .map_err(|err| Error::new(format!("db commit failed: {err}")))?;
        Ok(())
    }
}

const UPSERT_SQL: &str = "INSERT INTO candles \
     (symbol, interval, time, open, high, low, close, median, volume) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
     ON CONFLICT (symbol, interval, time) DO UPDATE SET \
     open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
     close = EXCLUDED.close, median = EXCLUDED.median, volume = EXCLUDED.volume";

fn split_statements(sql: &str) -> Vec<String> {
    let mut cleaned = String::new();
    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        cleaned.push_str(line);
        cleaned.push('\n');
    }
    cleaned
        .split(';')
        .map(|statement| statement.trim().to_string())
        .filter(|statement| !statement.is_empty())
        .collect()
}

fn to_timestamp(seconds: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| Error::new("invalid timestamp"))
}
