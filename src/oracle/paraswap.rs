//! ParaSwap v2 API client
//!
//! Three endpoints:
//! - `GET  /prices`                        price a pair (cached per URL)
//! - `POST /transactions/{chain}`          build swap calldata for a route
//! - `GET  /tokens/{chain}`                token list for the registry
//!
//! Status handling on `/prices`: 429 is a retryable rate limit, 400 means the
//! pair has no route and yields a sentinel quote, any other non-2xx is an
//! upstream failure.

use alloy_primitives::{Bytes, U256};
use async_trait::async_trait;
use reqwest::{header, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::{OracleQuote, PriceSource, QuoteRequest, ResponseCache, SwapRequest};
use crate::error::{ArbError, Result};
use crate::tokens::Token;

pub const DEFAULT_BASE_URL: &str = "https://apiv4.paraswap.io/v2";

const REFERRER: &str = "flasharb";

#[derive(Clone)]
pub struct ParaswapClient {
    http: reqwest::Client,
    base_url: String,
    network: u64,
    /// Comma-separated upstream sources (`includeDEXS`)
    include_dexs: Option<String>,
    cache: Arc<ResponseCache>,
}

#[derive(Deserialize)]
struct TokenList {
    tokens: Vec<Token>,
}

#[derive(Deserialize)]
struct BuiltTransaction {
    data: String,
}

impl ParaswapClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        network: u64,
        include_dexs: Option<String>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            network,
            include_dexs,
            cache,
        }
    }

    /// Full `/prices` URL; also the cache key
    pub fn prices_url(&self, request: &QuoteRequest) -> Result<Url> {
        let mut params = vec![
            ("from", format!("{:?}", request.from)),
            ("to", format!("{:?}", request.to)),
            ("amount", request.amount.to_string()),
            ("side", request.side.to_string()),
            ("network", self.network.to_string()),
        ];
        if let Some(dexs) = &self.include_dexs {
            params.push(("includeDEXS", dexs.clone()));
        }

        Url::parse_with_params(&format!("{}/prices", self.base_url), &params)
            .map_err(|e| ArbError::Config(format!("Invalid aggregator URL: {}", e)))
    }

    /// Every token the aggregator lists for this network
    pub async fn fetch_token_list(&self) -> Result<Vec<Token>> {
        let url = format!("{}/tokens/{}", self.base_url, self.network);
        let response = self.http.get(&url).send().await?;
        check_status(&response, "tokens")?;

        let list: TokenList = response.json().await?;
        Ok(list.tokens)
    }
}

#[async_trait]
impl PriceSource for ParaswapClient {
    async fn price(&self, request: &QuoteRequest) -> Result<OracleQuote> {
        let url = self.prices_url(request)?;
        let key = url.to_string();

        if let Some(body) = self.cache.get(&key).await {
            trace!("Cache hit {}", key);
            return parse_price(request, &body);
        }

        let response = self.http.get(url).send().await?;
        match response.status() {
            s if s.is_success() => {
                let cache_control = response
                    .headers()
                    .get(header::CACHE_CONTROL)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let body = response.text().await?;
                let quote = parse_price(request, &body)?;
                self.cache.store(&key, &body, cache_control.as_deref()).await;
                Ok(quote)
            }
            StatusCode::BAD_REQUEST => {
                debug!("No route {:?} -> {:?} for {}", request.from, request.to, request.amount);
                Ok(OracleQuote::sentinel(request))
            }
            _ => Err(status_error(&response, "prices")),
        }
    }

    async fn build_transaction(&self, swap: &SwapRequest) -> Result<Bytes> {
        let url = format!(
            "{}/transactions/{}?skipChecks=true",
            self.base_url, self.network
        );
        let body = json!({
            "priceRoute": swap.route,
            "srcToken": format!("{:?}", swap.src_token),
            "destToken": format!("{:?}", swap.dest_token),
            "srcAmount": swap.src_amount.to_string(),
            "destAmount": swap.dest_amount.to_string(),
            "userAddress": format!("{:?}", swap.user_address),
            "fromDecimals": swap.src_decimals,
            "toDecimals": swap.dest_decimals,
            "referrer": REFERRER,
        });

        let response = self.http.post(&url).json(&body).send().await?;
        check_status(&response, "transactions")?;

        let built: BuiltTransaction = response.json().await?;
        let data = hex::decode(built.data.trim_start_matches("0x"))
            .map_err(|e| ArbError::Decode(format!("Swap calldata is not hex: {}", e)))?;
        Ok(Bytes::from(data))
    }
}

fn check_status(response: &reqwest::Response, endpoint: &'static str) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(status_error(response, endpoint))
    }
}

fn status_error(response: &reqwest::Response, endpoint: &'static str) -> ArbError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        ArbError::RateLimited { retry_after }
    } else {
        ArbError::Upstream {
            endpoint,
            status: status.as_u16(),
        }
    }
}

/// Amounts arrive as decimal strings, occasionally as JSON numbers
fn parse_amount(value: &Value, field: &str) -> Result<U256> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(ArbError::Decode(format!("Missing {} in priceRoute", field))),
    };
    U256::from_str_radix(&text, 10)
        .map_err(|e| ArbError::Decode(format!("Bad {} {:?}: {}", field, text, e)))
}

fn parse_block(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_price(request: &QuoteRequest, body: &str) -> Result<OracleQuote> {
    let json: Value = serde_json::from_str(body)?;
    let route = json
        .get("priceRoute")
        .ok_or_else(|| ArbError::Decode("Response has no priceRoute".to_string()))?;
    let details = &route["details"];

    Ok(OracleQuote {
        from: request.from,
        to: request.to,
        amount: request.amount,
        side: request.side,
        src_amount: parse_amount(&details["srcAmount"], "srcAmount")?,
        dest_amount: parse_amount(&details["destAmount"], "destAmount")?,
        block_number: parse_block(&route["blockNumber"]),
        route: Some(route.clone()),
    })
}

/// `includeDEXS` value for an allow-list; empty means no restriction
pub fn join_sources(sources: &[String]) -> Option<String> {
    if sources.is_empty() {
        None
    } else {
        Some(sources.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Side;
    use alloy_primitives::Address;
    use mockito::{Matcher, Server};

    const USDT: Address = Address::repeat_byte(0xaa);
    const WETH: Address = Address::repeat_byte(0xbb);

    fn client(server: &Server) -> ParaswapClient {
        ParaswapClient::new(
            reqwest::Client::new(),
            &server.url(),
            1,
            Some("Uniswap,Sushiswap".to_string()),
            Arc::new(ResponseCache::new()),
        )
    }

    fn request(amount: u64) -> QuoteRequest {
        QuoteRequest { from: USDT, to: WETH, amount: U256::from(amount), side: Side::Sell }
    }

    fn price_body(src: &str, dest: &str, block: u64) -> String {
        json!({
            "priceRoute": {
                "blockNumber": block,
                "details": { "srcAmount": src, "destAmount": dest, "tokenFrom": "0xaa", "tokenTo": "0xbb" },
                "bestRoute": []
            }
        })
        .to_string()
    }

    #[test]
    fn test_url_contains_every_parameter() {
        let client = ParaswapClient::new(
            reqwest::Client::new(),
            "https://example.invalid/v2/",
            137,
            Some("Curve,Aave2".to_string()),
            Arc::new(ResponseCache::new()),
        );
        let url = client.prices_url(&request(1_000)).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/v2/prices");
        assert!(pairs.contains(&("amount".into(), "1000".into())));
        assert!(pairs.contains(&("side".into(), "SELL".into())));
        assert!(pairs.contains(&("network".into(), "137".into())));
        assert!(pairs.contains(&("includeDEXS".into(), "Curve,Aave2".into())));
    }

    #[tokio::test]
    async fn test_price_parses_route() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/prices")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(price_body("1000", "1005000", 123))
            .create_async()
            .await;

        let quote = client(&server).price(&request(1_000)).await.unwrap();
        assert_eq!(quote.src_amount, U256::from(1_000u64));
        assert_eq!(quote.dest_amount, U256::from(1_005_000u64));
        assert_eq!(quote.block_number, Some(123));
        assert!(!quote.is_sentinel());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_route_is_sentinel() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/prices")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"No routes found"}"#)
            .create_async()
            .await;

        let quote = client(&server).price(&request(1_000)).await.unwrap();
        assert!(quote.is_sentinel());
        assert_eq!(quote.dest_amount, U256::ZERO);
        assert_eq!(quote.src_amount, U256::MAX);
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/prices")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;

        let err = client(&server).price(&request(1_000)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_server_error_is_upstream() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/prices")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = client(&server).price(&request(1_000)).await.unwrap_err();
        assert!(matches!(err, ArbError::Upstream { endpoint: "prices", status: 503 }));
    }

    #[tokio::test]
    async fn test_cached_response_skips_network() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/prices")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("cache-control", "max-age=60")
            .with_body(price_body("1000", "2000", 5))
            .expect(2)
            .create_async()
            .await;

        let client = client(&server);
        client.price(&request(1_000)).await.unwrap();
        client.price(&request(1_000)).await.unwrap();
        // different amount, different URL, different entry
        client.price(&request(2_000)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_store_is_refetched() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/prices")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("cache-control", "no-store")
            .with_body(price_body("1000", "2000", 5))
            .expect(2)
            .create_async()
            .await;

        let client = client(&server);
        client.price(&request(1_000)).await.unwrap();
        client.price(&request(1_000)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_build_transaction_posts_route() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/transactions/1")
            .match_query(Matcher::UrlEncoded("skipChecks".into(), "true".into()))
            .match_body(Matcher::PartialJson(json!({
                "srcAmount": "1000",
                "destAmount": "990",
                "fromDecimals": 6,
                "toDecimals": 18,
                "priceRoute": { "blockNumber": 9 }
            })))
            .with_status(200)
            .with_body(r#"{"data":"0xdeadbeef"}"#)
            .create_async()
            .await;

        let swap = SwapRequest {
            route: json!({ "blockNumber": 9 }),
            src_token: USDT,
            dest_token: WETH,
            src_amount: U256::from(1_000u64),
            dest_amount: U256::from(990u64),
            src_decimals: 6,
            dest_decimals: 18,
            user_address: Address::repeat_byte(0xcc),
        };
        let data = client(&server).build_transaction(&swap).await.unwrap();
        assert_eq!(data.as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_list() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/tokens/1")
            .with_status(200)
            .with_body(
                json!({ "tokens": [
                    { "symbol": "USDT", "address": "0xdac17f958d2ee523a2206206994597c13d831ec7", "decimals": 6, "img": "x" }
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let tokens = client(&server).fetch_token_list().await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].symbol, "USDT");
        assert_eq!(tokens[0].decimals, 6);
    }
}
