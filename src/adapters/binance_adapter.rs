//! Binance spot REST market data adapter.
//!
//! Public endpoints only. Every request is bounded by the time left on the
//! caller's [`CallContext`].

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::config_validation::DEFAULT_REST_URL;
use crate::domain::error::TradebotError;
use crate::domain::ohlcv::{Kline, TickerPrice};
use crate::ports::config_port::ConfigPort;
use crate::ports::market_data_port::{CallContext, MarketDataPort};

#[derive(Debug, Deserialize)]
struct SymbolPrice {
    symbol: String,
    price: String,
}

pub struct BinanceAdapter {
    client: Client,
    base_url: String,
}

impl BinanceAdapter {
    pub fn new(base_url: &str) -> Result<Self, TradebotError> {
        let client = Client::builder()
            .user_agent(concat!("tradebot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(std::io::Error::other)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradebotError> {
        let url = config
            .get_string("broker", "rest_url")
            .unwrap_or_else(|| DEFAULT_REST_URL.to_string());
        Self::new(&url)
    }

    fn get_json(
        &self,
        ctx: &CallContext,
        symbol: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, TradebotError> {
        let operation = format!("requesting {path} for {symbol}");
        let timeout = ctx.remaining(&operation)?;
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, ?query, "binance request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .timeout(timeout)
            .send()
            .map_err(|e| request_error(e, symbol, &operation))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TradebotError::MarketData {
                symbol: symbol.to_string(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        response
            .json::<Value>()
            .map_err(|e| request_error(e, symbol, &operation))
    }
}

fn request_error(e: reqwest::Error, symbol: &str, operation: &str) -> TradebotError {
    if e.is_timeout() {
        TradebotError::Timeout {
            operation: operation.to_string(),
        }
    } else {
        TradebotError::MarketData {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        }
    }
}

fn malformed(symbol: &str, reason: impl Into<String>) -> TradebotError {
    TradebotError::MarketData {
        symbol: symbol.to_string(),
        reason: reason.into(),
    }
}

/// Binance encodes decimals as strings; accept plain numbers too.
fn decimal(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn millis(value: &Value) -> Option<DateTime<Utc>> {
    value.as_i64().and_then(DateTime::from_timestamp_millis)
}

pub(crate) fn parse_prices(symbol: &str, body: Value) -> Result<Vec<TickerPrice>, TradebotError> {
    let raw: Vec<SymbolPrice> = match body {
        Value::Array(_) => serde_json::from_value(body),
        other => serde_json::from_value(other).map(|p| vec![p]),
    }
    .map_err(|e| malformed(symbol, format!("unexpected ticker payload: {e}")))?;

    raw.into_iter()
        .map(|p| {
            let price = p
                .price
                .parse()
                .map_err(|_| malformed(symbol, format!("bad price '{}'", p.price)))?;
            Ok(TickerPrice {
                symbol: p.symbol,
                price,
            })
        })
        .collect()
}

/// `[open_time, open, high, low, close, volume, close_time, ...]`
pub(crate) fn parse_klines(symbol: &str, body: Value) -> Result<Vec<Kline>, TradebotError> {
    let Value::Array(rows) = body else {
        return Err(malformed(symbol, "klines payload is not an array"));
    };

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let fields = row
                .as_array()
                .filter(|f| f.len() >= 7)
                .ok_or_else(|| malformed(symbol, format!("kline {i} has too few fields")))?;
            let num = |idx: usize| {
                decimal(&fields[idx])
                    .ok_or_else(|| malformed(symbol, format!("kline {i} field {idx} is not a number")))
            };
            let time = |idx: usize| {
                millis(&fields[idx])
                    .ok_or_else(|| malformed(symbol, format!("kline {i} field {idx} is not a timestamp")))
            };
            Ok(Kline {
                open_time: time(0)?,
                open: num(1)?,
                high: num(2)?,
                low: num(3)?,
                close: num(4)?,
                volume: num(5)?,
                close_time: time(6)?,
            })
        })
        .collect()
}

impl MarketDataPort for BinanceAdapter {
    fn list_ticker_prices(
        &self,
        ctx: &CallContext,
        symbol: &str,
    ) -> Result<Vec<TickerPrice>, TradebotError> {
        let body = self.get_json(
            ctx,
            symbol,
            "/api/v3/ticker/price",
            &[("symbol", symbol.to_string())],
        )?;
        parse_prices(symbol, body)
    }

    fn list_klines(
        &self,
        ctx: &CallContext,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, TradebotError> {
        let body = self.get_json(
            ctx,
            symbol,
            "/api/v3/klines",
            &[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        parse_klines(symbol, body)
    }

    /// Base-asset volume of the current daily candle.
    fn get_24h_volume(&self, ctx: &CallContext, symbol: &str) -> Result<f64, TradebotError> {
        self.list_klines(ctx, symbol, "1d", 1)?
            .last()
            .map(|k| k.volume)
            .ok_or_else(|| malformed(symbol, "no daily kline returned"))
    }
}
