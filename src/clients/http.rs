//! HTTP-backed collaborator implementations.
//!
//! Thin JSON clients with fixed timeouts. Responses are classified into the
//! engine's error taxonomy here; retrying is the caller's job via the
//! `RetryPolicy` threaded through each call site.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::{parse_amount_range, TradeDisclosure, TransactionType};

use super::{
    AccountSnapshot, BrokerGateway, BrokerPosition, MarketDataFeed, OrderInfo, OrderSide,
    TimeInForce, TradeFeed,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client() -> EngineResult<Client> {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| EngineError::permanent(format!("failed to build HTTP client: {e}")))
}

/// Map a reqwest transport error into the taxonomy. Timeouts and connection
/// failures are transient until the retry budget runs out.
fn classify_transport(err: reqwest::Error) -> EngineError {
    if err.is_timeout() || err.is_connect() {
        EngineError::transient(format!("request failed: {err}"))
    } else {
        EngineError::permanent(format!("request failed: {err}"))
    }
}

/// Classify a non-success status. 429 carries the server's Retry-After;
/// 5xx is transient; auth and validation failures are permanent.
async fn classify_status(response: Response) -> EngineError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    match status {
        StatusCode::TOO_MANY_REQUESTS => EngineError::rate_limited(
            format!("rate limited: {body}"),
            retry_after.unwrap_or(Duration::from_secs(1)),
        ),
        s if s.is_server_error() => EngineError::transient(format!("{s}: {body}")),
        s => EngineError::permanent(format!("{s}: {body}")),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> EngineResult<T> {
    if !response.status().is_success() {
        return Err(classify_status(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| EngineError::permanent(format!("failed to parse response: {e}")))
}

// ---------------------------------------------------------------------------
// Trade feed
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DisclosureRow {
    representative: String,
    #[serde(default)]
    district: Option<String>,
    ticker: String,
    transaction_date: NaiveDate,
    transaction_type: String,
    amount: String,
    #[serde(default)]
    last_modified: Option<chrono::DateTime<Utc>>,
}

/// Disclosure feed client.
pub struct HttpTradeFeed {
    client: Client,
    base_url: String,
}

impl HttpTradeFeed {
    pub fn new(base_url: impl Into<String>) -> EngineResult<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl TradeFeed for HttpTradeFeed {
    async fn fetch(&self, date: NaiveDate) -> EngineResult<Vec<TradeDisclosure>> {
        let url = format!("{}/trades?date={date}", self.base_url);
        debug!(url = %url, "Fetching disclosures");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(classify_transport)?;
        let rows: Vec<DisclosureRow> = read_json(response).await?;

        let disclosures = rows
            .into_iter()
            .filter_map(|row| {
                let (amount_min, amount_max) = parse_amount_range(&row.amount)?;
                let transaction_type = match row.transaction_type.to_lowercase().as_str() {
                    "purchase" => TransactionType::Purchase,
                    "sale" | "sale_full" | "sale_partial" => TransactionType::Sale,
                    _ => return None,
                };
                Some(TradeDisclosure {
                    entity_name: row.representative,
                    district: row.district,
                    ticker: row.ticker,
                    transaction_date: row.transaction_date,
                    transaction_type,
                    amount_min,
                    amount_max,
                    last_modified: row.last_modified.unwrap_or_else(Utc::now),
                })
            })
            .collect();

        Ok(disclosures)
    }
}

// ---------------------------------------------------------------------------
// Brokerage
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AssetRow {
    tradable: bool,
}

#[derive(Debug, Deserialize)]
struct QuoteRow {
    price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct OrderRow {
    id: String,
    symbol: String,
    side: String,
    notional: Decimal,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PositionRow {
    symbol: String,
    qty: Decimal,
    avg_entry_price: Decimal,
    market_value: Decimal,
    unrealized_pl: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountRow {
    buying_power: Decimal,
    equity: Decimal,
}

/// Brokerage client speaking a paper-trading style JSON API.
pub struct HttpBrokerGateway {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl HttpBrokerGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> EngineResult<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        })
    }

    /// Read credentials from `BROKER_BASE_URL` / `BROKER_API_KEY` /
    /// `BROKER_API_SECRET`.
    pub fn from_env() -> EngineResult<Self> {
        let base_url = std::env::var("BROKER_BASE_URL")
            .map_err(|_| EngineError::config("BROKER_BASE_URL not set"))?;
        let api_key = std::env::var("BROKER_API_KEY")
            .map_err(|_| EngineError::config("BROKER_API_KEY not set"))?;
        let api_secret = std::env::var("BROKER_API_SECRET")
            .map_err(|_| EngineError::config("BROKER_API_SECRET not set"))?;
        Self::new(base_url, api_key, api_secret)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }
}

#[async_trait]
impl BrokerGateway for HttpBrokerGateway {
    async fn validate_ticker(&self, ticker: &str) -> EngineResult<bool> {
        let response = self
            .get(&format!("/v2/assets/{ticker}"))
            .send()
            .await
            .map_err(classify_transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let asset: AssetRow = read_json(response).await?;
        Ok(asset.tradable)
    }

    async fn current_price(&self, ticker: &str) -> EngineResult<Option<Decimal>> {
        let response = self
            .get(&format!("/v2/stocks/{ticker}/trades/latest"))
            .send()
            .await
            .map_err(classify_transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let quote: QuoteRow = read_json(response).await?;
        Ok(quote.price)
    }

    async fn place_order(
        &self,
        ticker: &str,
        side: OrderSide,
        notional: Decimal,
        time_in_force: TimeInForce,
    ) -> EngineResult<OrderInfo> {
        let body = serde_json::json!({
            "symbol": ticker,
            "notional": notional,
            "side": match side { OrderSide::Buy => "buy", OrderSide::Sell => "sell" },
            "type": "market",
            "time_in_force": match time_in_force { TimeInForce::Day => "day", TimeInForce::Gtc => "gtc" },
        });

        let response = self
            .client
            .post(format!("{}/v2/orders", self.base_url))
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        let order: OrderRow = read_json(response).await?;

        Ok(OrderInfo {
            id: order.id,
            ticker: order.symbol,
            side: if order.side == "buy" { OrderSide::Buy } else { OrderSide::Sell },
            notional: order.notional,
            status: order.status,
            submitted_at: Utc::now(),
        })
    }

    async fn positions(&self) -> EngineResult<Vec<BrokerPosition>> {
        let response = self.get("/v2/positions").send().await.map_err(classify_transport)?;
        let rows: Vec<PositionRow> = read_json(response).await?;
        Ok(rows
            .into_iter()
            .map(|p| BrokerPosition {
                ticker: p.symbol,
                qty: p.qty,
                avg_entry_price: p.avg_entry_price,
                market_value: p.market_value,
                unrealized_pnl: p.unrealized_pl,
            })
            .collect())
    }

    async fn account(&self) -> EngineResult<AccountSnapshot> {
        let response = self.get("/v2/account").send().await.map_err(classify_transport)?;
        let row: AccountRow = read_json(response).await?;
        Ok(AccountSnapshot {
            buying_power: row.buying_power,
            equity: row.equity,
        })
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BarRow {
    c: f64,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Vec<BarRow>,
}

/// Daily-bar market data client.
pub struct HttpMarketDataFeed {
    client: Client,
    base_url: String,
}

impl HttpMarketDataFeed {
    pub fn new(base_url: impl Into<String>) -> EngineResult<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl MarketDataFeed for HttpMarketDataFeed {
    async fn indicator_series(&self, ticker: &str, lookback: usize) -> EngineResult<Vec<f64>> {
        let url = format!(
            "{}/v2/stocks/{ticker}/bars?timeframe=1Day&limit={lookback}",
            self.base_url
        );
        debug!(url = %url, "Fetching bars");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(classify_transport)?;
        let bars: BarsResponse = read_json(response).await?;
        Ok(bars.bars.into_iter().map(|b| b.c).collect())
    }
}
