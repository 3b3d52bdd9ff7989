use crate::errors::{RiskError, RiskResult};
use crate::state::PriceRow;
use chrono::{DateTime, NaiveDate};
use futures_util::future::BoxFuture;
use reqwest::Client;

/// Binance returns at most this many klines per request.
const BINANCE_PAGE_LIMIT: usize = 1000;
/// Upper bound on rows pulled for one crypto ticker (~13 years of dailies).
const BINANCE_MAX_ROWS: usize = 5000;
const DAY_MS: i64 = 86_400_000;

/// Daily OHLCV history provider. Any failure is `DataUnavailable`; rows are
/// ascending by date and clipped to `[start, end]`.
pub trait MarketDataSource: Send + Sync {
    fn fetch_history<'a>(
        &'a self,
        ticker: &'a str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BoxFuture<'a, RiskResult<Vec<PriceRow>>>;
}

/// Tickers with a `/` (e.g. `BTC/USDT`) go to Binance, everything else to
/// the Yahoo chart API.
#[derive(Clone)]
pub struct HttpMarketData {
    client: Client,
    yahoo_base_url: String,
    binance_base_url: String,
}

impl HttpMarketData {
    pub fn new(yahoo_base_url: &str, binance_base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("riskmc/0.1")
            .build()
            .unwrap_or_default();

        Self {
            client,
            yahoo_base_url: yahoo_base_url.trim_end_matches('/').to_string(),
            binance_base_url: binance_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_yahoo(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> RiskResult<Vec<PriceRow>> {
        let period1 = start.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp()).unwrap_or(0);
        // period2 is exclusive
        let period2 = end
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc().timestamp())
            .unwrap_or(i64::MAX);
        let url = format!(
            "{}/{ticker}?period1={period1}&period2={period2}&interval=1d&events=history",
            self.yahoo_base_url
        );

        let body = self.get_text(&url, ticker).await?;
        let rows = parse_yahoo_chart(&body)?;
        Ok(clip(rows, start, end))
    }

    async fn fetch_binance(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> RiskResult<Vec<PriceRow>> {
        let symbol = ticker.replace('/', "");
        let mut cursor = start.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp_millis()).unwrap_or(0);
        let end_ms = end
            .and_hms_opt(23, 59, 59)
            .map(|t| t.and_utc().timestamp_millis())
            .unwrap_or(i64::MAX);

        let mut rows: Vec<PriceRow> = Vec::new();
        while cursor < end_ms && rows.len() < BINANCE_MAX_ROWS {
            let url = format!(
                "{}/klines?symbol={symbol}&interval=1d&startTime={cursor}&endTime={end_ms}&limit={BINANCE_PAGE_LIMIT}",
                self.binance_base_url
            );
            let body = self.get_text(&url, ticker).await?;
            let page = parse_binance_klines(&body)?;
            let Some(last) = page.last() else {
                break;
            };

            let last_ms = last
                .date
                .and_hms_opt(0, 0, 0)
                .map(|t| t.and_utc().timestamp_millis())
                .unwrap_or(end_ms);
            let full_page = page.len() >= BINANCE_PAGE_LIMIT;
            rows.extend(page);
            if !full_page {
                break;
            }
            cursor = last_ms + DAY_MS;
        }

        rows.truncate(BINANCE_MAX_ROWS);
        Ok(clip(rows, start, end))
    }

    async fn get_text(&self, url: &str, ticker: &str) -> RiskResult<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RiskError::DataUnavailable(format!("{ticker}: request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RiskError::DataUnavailable(format!("{ticker}: HTTP {status}: {body}")));
        }

        resp.text()
            .await
            .map_err(|e| RiskError::DataUnavailable(format!("{ticker}: read body: {e}")))
    }
}

impl MarketDataSource for HttpMarketData {
    fn fetch_history<'a>(
        &'a self,
        ticker: &'a str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BoxFuture<'a, RiskResult<Vec<PriceRow>>> {
        Box::pin(async move {
            if start > end {
                return Err(RiskError::invalid("start", format!("{start} is after end {end}")));
            }
            let rows = if ticker.contains('/') {
                self.fetch_binance(ticker, start, end).await?
            } else {
                self.fetch_yahoo(ticker, start, end).await?
            };
            tracing::info!(ticker = %ticker, rows = rows.len(), %start, %end, "fetched price history");
            Ok(rows)
        })
    }
}

fn clip(mut rows: Vec<PriceRow>, start: NaiveDate, end: NaiveDate) -> Vec<PriceRow> {
    rows.retain(|r| r.date >= start && r.date <= end);
    rows.sort_by_key(|r| r.date);
    rows.dedup_by_key(|r| r.date);
    rows
}

// Yahoo chart response (trimmed):
// {
//   "chart": {
//     "result": [{
//       "timestamp": [1704205800, ...],
//       "indicators": {
//         "quote": [{ "open": [..], "high": [..], "low": [..], "close": [..], "volume": [..] }],
//         "adjclose": [{ "adjclose": [..] }]
//       }
//     }],
//     "error": null
//   }
// }

#[derive(serde::Deserialize)]
struct YahooResponse {
    chart: YahooChart,
}

#[derive(serde::Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(serde::Deserialize)]
struct YahooError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(serde::Deserialize)]
struct YahooResult {
    timestamp: Option<Vec<i64>>,
    indicators: YahooIndicators,
}

#[derive(serde::Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
    adjclose: Option<Vec<YahooAdjClose>>,
}

#[derive(serde::Deserialize)]
struct YahooQuote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

#[derive(serde::Deserialize)]
struct YahooAdjClose {
    adjclose: Vec<Option<f64>>,
}

/// Parse a Yahoo chart payload into daily rows. Prices are split/dividend
/// adjusted when `adjclose` is present. Days with any null field are skipped.
pub fn parse_yahoo_chart(body: &str) -> RiskResult<Vec<PriceRow>> {
    let resp: YahooResponse = serde_json::from_str(body)
        .map_err(|e| RiskError::DataUnavailable(format!("yahoo parse: {e}")))?;

    if let Some(err) = resp.chart.error {
        return Err(RiskError::DataUnavailable(format!(
            "yahoo error {}: {}",
            err.code.unwrap_or_default(),
            err.description.unwrap_or_default()
        )));
    }

    let result = resp
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| RiskError::DataUnavailable("yahoo: empty result".into()))?;
    let timestamps = result.timestamp.unwrap_or_default();
    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| RiskError::DataUnavailable("yahoo: missing quote block".into()))?;
    let adjclose = result
        .indicators
        .adjclose
        .and_then(|a| a.into_iter().next())
        .map(|a| a.adjclose);

    let at = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();

    let mut rows = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
            at(&quote.open, i),
            at(&quote.high, i),
            at(&quote.low, i),
            at(&quote.close, i),
            at(&quote.volume, i),
        ) else {
            continue;
        };
        let Some(date) = DateTime::from_timestamp(*ts, 0).map(|dt| dt.date_naive()) else {
            continue;
        };

        let factor = match adjclose.as_ref().and_then(|a| at(a, i)) {
            Some(adj) if close > 0.0 => adj / close,
            _ => 1.0,
        };

        rows.push(PriceRow {
            date,
            open: open * factor,
            high: high * factor,
            low: low * factor,
            close: close * factor,
            volume,
        });
    }
    Ok(rows)
}

/// Parse Binance `/klines` output:
/// `[[open_time_ms, "open", "high", "low", "close", "volume", close_time_ms, ...], ...]`
pub fn parse_binance_klines(body: &str) -> RiskResult<Vec<PriceRow>> {
    let klines: Vec<Vec<serde_json::Value>> = serde_json::from_str(body)
        .map_err(|e| RiskError::DataUnavailable(format!("binance parse: {e}")))?;

    let num = |v: &serde_json::Value| -> Option<f64> {
        match v {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };

    klines
        .iter()
        .map(|k| {
            let field = |i: usize| k.get(i).and_then(num);
            let open_time = k.first().and_then(|v| v.as_i64());
            match (open_time, field(1), field(2), field(3), field(4), field(5)) {
                (Some(ts), Some(open), Some(high), Some(low), Some(close), Some(volume)) => {
                    let date = DateTime::from_timestamp_millis(ts)
                        .map(|dt| dt.date_naive())
                        .ok_or_else(|| RiskError::DataUnavailable(format!("binance: bad open time {ts}")))?;
                    Ok(PriceRow { date, open, high, low, close, volume })
                }
                _ => Err(RiskError::DataUnavailable(format!("binance: malformed kline {k:?}"))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAHOO_FIXTURE: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "AAPL"},
                "timestamp": [1704205800, 1704292200, 1704378600],
                "indicators": {
                    "quote": [{
                        "open":   [187.15, 184.22, null],
                        "high":   [188.44, 185.88, 183.09],
                        "low":    [183.89, 183.43, 180.88],
                        "close":  [185.64, 184.25, 181.91],
                        "volume": [82488700, 58414500, 71983600]
                    }],
                    "adjclose": [{ "adjclose": [184.73, 183.35, 181.02] }]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_yahoo_skips_nulls_and_adjusts() {
        let rows = parse_yahoo_chart(YAHOO_FIXTURE).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert!((rows[0].close - 184.73).abs() < 1e-9);
        assert!(rows[0].open < 187.15);
        assert_eq!(rows[1].volume, 58_414_500.0);
    }

    #[test]
    fn test_parse_yahoo_error_payload() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let err = parse_yahoo_chart(body).unwrap_err();
        assert!(matches!(err, RiskError::DataUnavailable(ref m) if m.contains("delisted")));
    }

    #[test]
    fn test_parse_binance_klines() {
        let body = r#"[
            [1704067200000, "42283.58", "44184.10", "42180.77", "44179.55", "27174.29", 1704153599999, "0", 1, "0", "0", "0"],
            [1704153600000, "44179.55", "45879.63", "44148.34", "44946.91", "65146.40", 1704239999999, "0", 1, "0", "0", "0"]
        ]"#;
        let rows = parse_binance_klines(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(rows[1].close, 44946.91);
    }

    #[test]
    fn test_parse_binance_rejects_garbage() {
        assert!(matches!(
            parse_binance_klines(r#"[[1704067200000, "x"]]"#),
            Err(RiskError::DataUnavailable(_))
        ));
        assert!(parse_binance_klines(r#"{"code":-1121,"msg":"Invalid symbol."}"#).is_err());
    }

    #[test]
    fn test_clip_orders_and_bounds() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let row = |day| PriceRow { date: d(day), open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 0.0 };
        let rows = clip(vec![row(5), row(1), row(3), row(3), row(9)], d(2), d(5));
        let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(3), d(5)]);
    }
}
