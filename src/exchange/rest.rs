use crate::exchange::{CandleFeed, FeedRequest};
use crate::models::Candle;
use crate::{Error, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RestFeedConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub page_limit: u32,
}

impl Default for RestFeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            timeout_secs: 30,
            page_limit: 1000,
        }
    }
}

pub struct RestCandleFeed {
    client: Client,
    config: RestFeedConfig,
}

impl RestCandleFeed {
    pub fn new(config: RestFeedConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::new("base_url must be set"));
        }
        if config.page_limit == 0 {
            return Err(Error::new("page_limit must be positive"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|err| Error::new(format!("http client build failed: {err}")))?;
        Ok(Self { client, config })
    }
}

impl CandleFeed for RestCandleFeed {
    fn fetch_candles(&self, request: &FeedRequest, cancel: &AtomicBool) -> Result<Vec<Candle>> {
        if request.timeframe.is_none() {
            return Err(Error::new("feed request requires a concrete time frame"));
        }
        if request.start_time > request.end_time {
            return Err(Error::new("feed request start_time must be <= end_time"));
        }

        let limit = self.config.page_limit.min(1000);
        let mut cursor_ms = request.start_time * 1000;
        let end_ms = request.end_time * 1000;
        let mut all: Vec<Candle> = Vec::new();

        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(Error::new("fetch cancelled"));
            }

            let url = format!("{}/api/v3/klines", self.config.base_url);
            let query = vec![
                ("symbol".to_string(), request.symbol.clone()),
                (
                    "interval".to_string(),
                    request.timeframe.as_str().to_string(),
                ),
                ("startTime".to_string(), cursor_ms.to_string()),
                ("endTime".to_string(), end_ms.to_string()),
                ("limit".to_string(), limit.to_string()),
            ];
            let text = fetch_text_with_retry(&self.client, &url, &query, cancel)?;
            let batch = parse_klines(&text)?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();
            let last_open_ms = batch
                .last()
                .map(|candle| candle.time * 1000)
                .unwrap_or(end_ms);
            all.extend(batch);

            if last_open_ms >= end_ms || batch_len < limit as usize {
                break;
            }
            cursor_ms = last_open_ms + 1;
        }

        all.sort_by_key(|candle| candle.time);
        all.dedup_by_key(|candle| candle.time);
        Ok(all)
    }
}

pub fn parse_klines(payload: &str) -> Result<Vec<Candle>> {
    let data: Vec<Vec<Value>> = serde_json::from_str(payload)
        .map_err(|err| Error::new(format!("json parse failed: {err}")))?;

    let mut candles = Vec::with_capacity(data.len());
    for row in data {
        if row.len() < 6 {
            return Err(Error::new("kline row has insufficient fields"));
        }
        let open_time_ms = value_to_i64(&row[0])?;
        let open = value_to_f64(&row[1])?;
        let high = value_to_f64(&row[2])?;
        let low = value_to_f64(&row[3])?;
        let close = value_to_f64(&row[4])?;
        let volume = value_to_f64(&row[5])?;

        candles.push(Candle::new(
            open_time_ms / 1000,
            open,
            high,
            low,
            close,
            volume,
        )?);
    }

    Ok(candles)
}

fn fetch_text_with_retry(
    client: &Client,
    url: &str,
    query: &[(String, String)],
    cancel: &AtomicBool,
) -> Result<String> {
    const MAX_RETRIES: u32 = 3;
    const BASE_DELAY_MS: u64 = 500;

    let mut attempt = 0;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(Error::new("fetch cancelled"));
        }
        let response = client.get(url).query(query).send();
        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .text()
                        .map_err(|err| Error::new(format!("http read failed: {err}")));
                }

                if should_retry(status) && attempt < MAX_RETRIES {
                    let delay = retry_delay_ms(&response, attempt, BASE_DELAY_MS);
                    std::thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                    continue;
                }

                return Err(Error::new(format!("feed response status: {status}")));
            }
            Err(err) => {
                if attempt < MAX_RETRIES {
                    let delay = BASE_DELAY_MS * (1_u64 << attempt);
                    std::thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                    continue;
                }
                return Err(Error::new(format!("http request failed: {err}")));
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_delay_ms(response: &reqwest::blocking::Response, attempt: u32, base_ms: u64) -> u64 {
    if let Some(value) = response.headers().get("retry-after") {
        if let Ok(text) = value.to_str() {
            if let Ok(seconds) = text.parse::<u64>() {
                return seconds.saturating_mul(1000);
            }
        }
    }
    base_ms * (1_u64 << attempt)
}

fn value_to_i64(value: &Value) -> Result<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| Error::new("number is not i64")),
        Value::String(text) => text
            .parse::<i64>()
            .map_err(|err| Error::new(format!("invalid i64: {err}"))),
        _ => Err(Error::new("unexpected value type for i64")),
    }
}

fn value_to_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| Error::new("number is not f64")),
        Value::String(text) => text
            .parse::<f64>()
            .map_err(|err| Error::new(format!("invalid f64: {err}"))),
        _ => Err(Error::new("unexpected value type for f64")),
    }
}
