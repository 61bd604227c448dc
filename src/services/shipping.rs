//! Carrier-aggregation client: destination lookup and shipping-rate quotes.
//!
//! The provider is reached through [`ShippingRateProvider`] so checkout and the
//! shipping endpoints can run against a fake in tests. [`KomerceShippingClient`]
//! is the HTTP implementation.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::ShippingConfig;
use crate::errors::ServiceError;

pub const DEFAULT_KEYWORD_MIN_LENGTH: usize = 3;

const SEARCH_PATH: &str = "/tariff/api/v1/destination/search";
const CALCULATE_PATH: &str = "/tariff/api/v1/calculate";

/// Typed failure of a shipping provider call. Never defaulted away.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShippingProviderError {
    #[error("invalid shipping request: {0}")]
    InvalidRequest(String),

    #[error("shipping provider timed out")]
    Timeout,

    #[error("shipping provider returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("malformed shipping provider response: {0}")]
    Malformed(String),

    #[error("shipping provider unreachable: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ShippingProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ShippingProviderError::Timeout
        } else if err.is_decode() {
            ShippingProviderError::Malformed(err.to_string())
        } else {
            ShippingProviderError::Transport(err.to_string())
        }
    }
}

/// Candidate destination returned by the provider's address search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub subdistrict_name: String,
    #[serde(default)]
    pub district_name: String,
    #[serde(default)]
    pub city_name: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Parameters of a rate lookup. Weight is in grams; declared value in currency units.
#[derive(Debug, Clone, PartialEq)]
pub struct RateQuery {
    pub origin: String,
    pub destination: String,
    pub weight_grams: i64,
    pub declared_value: Decimal,
    pub courier: Option<String>,
}

/// One carrier service offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub carrier_name: String,
    pub service_name: String,
    pub price: Decimal,
    pub estimated_days: Option<String>,
    pub cod_available: bool,
}

impl ShippingQuote {
    pub fn label(&self) -> String {
        format!("{} - {}", self.carrier_name, self.service_name)
    }
}

#[async_trait]
pub trait ShippingRateProvider: Send + Sync {
    async fn search_destinations(
        &self,
        keyword: &str,
    ) -> Result<Vec<Destination>, ShippingProviderError>;

    async fn calculate_shipping_cost(
        &self,
        query: &RateQuery,
    ) -> Result<Vec<ShippingQuote>, ShippingProviderError>;
}

/// Trims and length-checks a destination search keyword.
pub fn normalize_keyword(keyword: &str, min_length: usize) -> Result<&str, ShippingProviderError> {
    let trimmed = keyword.trim();
    if trimmed.chars().count() < min_length {
        return Err(ShippingProviderError::InvalidRequest(format!(
            "Keyword must be at least {} characters",
            min_length
        )));
    }
    Ok(trimmed)
}

/// Picks the single destination whose subdistrict, district and city all match
/// (trimmed, case-insensitive).
pub fn resolve_destination(
    candidates: &[Destination],
    subdistrict: &str,
    district: &str,
    city: &str,
) -> Result<Destination, ServiceError> {
    let eq = |a: &str, b: &str| a.trim().to_lowercase() == b.trim().to_lowercase();

    let matches: Vec<&Destination> = candidates
        .iter()
        .filter(|d| {
            eq(&d.subdistrict_name, subdistrict)
                && eq(&d.district_name, district)
                && eq(&d.city_name, city)
        })
        .collect();

    match matches.as_slice() {
        [] => Err(ServiceError::AddressResolutionFailed(format!(
            "No destination matches '{}', '{}', '{}'",
            subdistrict, district, city
        ))),
        [first, rest @ ..] if rest.iter().all(|d| d.id == first.id) => Ok((*first).clone()),
        _ => Err(ServiceError::AddressResolutionFailed(format!(
            "Destination '{}', '{}', '{}' is ambiguous",
            subdistrict, district, city
        ))),
    }
}

/// Selects the quote for the requested carrier and service (case-insensitive).
pub fn select_quote(
    quotes: &[ShippingQuote],
    courier: &str,
    service: &str,
) -> Result<ShippingQuote, ServiceError> {
    quotes
        .iter()
        .find(|q| {
            q.carrier_name.trim().eq_ignore_ascii_case(courier.trim())
                && q.service_name.trim().eq_ignore_ascii_case(service.trim())
        })
        .cloned()
        .ok_or_else(|| ServiceError::ShippingServiceUnavailable {
            requested: format!("{} - {}", courier, service),
            available: quotes.iter().map(ShippingQuote::label).collect(),
        })
}

/// Renders grams as kilograms with two decimals, the unit the tariff API expects.
pub fn grams_to_kg_param(weight_grams: i64) -> String {
    let kg = (Decimal::from(weight_grams) / Decimal::from(1000))
        .round_dp_with_strategy(2, RoundingStrategy::AwayFromZero);
    format!("{:.2}", kg.max(Decimal::new(1, 2)))
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    meta: Meta,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(deserialize_with = "u16_from_any")]
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CalculateData {
    #[serde(default)]
    calculate_reguler: Option<Vec<RawQuote>>,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    shipping_name: String,
    service_name: String,
    #[serde(deserialize_with = "decimal_from_any")]
    shipping_cost: Decimal,
    #[serde(default)]
    etd: Option<String>,
    #[serde(default)]
    is_cod: bool,
}

impl From<RawQuote> for ShippingQuote {
    fn from(raw: RawQuote) -> Self {
        ShippingQuote {
            carrier_name: raw.shipping_name,
            service_name: raw.service_name,
            price: raw.shipping_cost,
            estimated_days: raw.etd.filter(|e| !e.trim().is_empty()),
            cod_available: raw.is_cod,
        }
    }
}

/// HTTP client for the Komerce tariff API.
#[derive(Clone)]
pub struct KomerceShippingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    keyword_min_length: usize,
}

impl KomerceShippingClient {
    pub fn new(config: &ShippingConfig) -> Result<Self, ShippingProviderError> {
        Self::with_timeout(
            config.base_url.clone(),
            config.api_key.clone(),
            config.timeout(),
        )
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ShippingProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShippingProviderError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            keyword_min_length: DEFAULT_KEYWORD_MIN_LENGTH,
        })
    }

    pub fn with_keyword_min_length(mut self, min_length: usize) -> Self {
        self.keyword_min_length = min_length;
        self
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ShippingProviderError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<Envelope<serde_json::Value>>(&body)
                .map(|env| env.meta.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).chars().take(200).collect());
            warn!(path, status = status.as_u16(), %message, "shipping provider error");
            return Err(ShippingProviderError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> = serde_json::from_slice(&body)
            .map_err(|e| ShippingProviderError::Malformed(e.to_string()))?;

        if envelope.meta.code != 200 {
            return Err(ShippingProviderError::Upstream {
                status: envelope.meta.code,
                message: envelope.meta.message,
            });
        }

        envelope
            .data
            .ok_or_else(|| ShippingProviderError::Malformed("response has no data".to_string()))
    }
}

#[async_trait]
impl ShippingRateProvider for KomerceShippingClient {
    #[instrument(skip(self))]
    async fn search_destinations(
        &self,
        keyword: &str,
    ) -> Result<Vec<Destination>, ShippingProviderError> {
        let keyword = normalize_keyword(keyword, self.keyword_min_length)?;
        let destinations: Vec<Destination> = self
            .get(SEARCH_PATH, &[("keyword", keyword.to_string())])
            .await?;
        debug!(count = destinations.len(), "destination search complete");
        Ok(destinations)
    }

    #[instrument(skip(self))]
    async fn calculate_shipping_cost(
        &self,
        query: &RateQuery,
    ) -> Result<Vec<ShippingQuote>, ShippingProviderError> {
        if query.origin.trim().is_empty() || query.destination.trim().is_empty() {
            return Err(ShippingProviderError::InvalidRequest(
                "origin and destination are required".to_string(),
            ));
        }
        if query.weight_grams <= 0 {
            return Err(ShippingProviderError::InvalidRequest(
                "weight must be positive".to_string(),
            ));
        }

        let params = [
            ("shipper_destination_id", query.origin.clone()),
            ("receiver_destination_id", query.destination.clone()),
            ("weight", grams_to_kg_param(query.weight_grams)),
            ("item_value", query.declared_value.round().normalize().to_string()),
            ("cod", "no".to_string()),
        ];
        let data: CalculateData = self.get(CALCULATE_PATH, &params).await?;
        let raw = data.calculate_reguler.ok_or_else(|| {
            ShippingProviderError::Malformed("response has no calculate_reguler".to_string())
        })?;

        let quotes = raw
            .into_iter()
            .map(ShippingQuote::from)
            .filter(|q| {
                query
                    .courier
                    .as_deref()
                    .map(|c| q.carrier_name.eq_ignore_ascii_case(c.trim()))
                    .unwrap_or(true)
            })
            .collect();
        Ok(quotes)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Int(i64),
    Float(f64),
    Str(String),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            StringOrNumber::Int(i) => i.to_string(),
            StringOrNumber::Float(f) => f.to_string(),
            StringOrNumber::Str(s) => s,
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(d).map(StringOrNumber::into_string)
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Option::<StringOrNumber>::deserialize(d).map(|v| v.map(StringOrNumber::into_string))
}

fn decimal_from_any<'de, D: Deserializer<'de>>(d: D) -> Result<Decimal, D::Error> {
    use serde::de::Error;
    match StringOrNumber::deserialize(d)? {
        StringOrNumber::Int(i) => Ok(Decimal::from(i)),
        StringOrNumber::Float(f) => Decimal::try_from(f).map_err(D::Error::custom),
        StringOrNumber::Str(s) => Decimal::from_str(s.trim()).map_err(D::Error::custom),
    }
}

fn u16_from_any<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    use serde::de::Error;
    let raw = StringOrNumber::deserialize(d)?.into_string();
    raw.parse::<u16>().map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn destination(id: &str, sub: &str, district: &str, city: &str) -> Destination {
        Destination {
            id: id.into(),
            subdistrict_name: sub.into(),
            district_name: district.into(),
            city_name: city.into(),
            zip_code: None,
            label: None,
        }
    }

    fn quote(carrier: &str, service: &str, price: Decimal) -> ShippingQuote {
        ShippingQuote {
            carrier_name: carrier.into(),
            service_name: service.into(),
            price,
            estimated_days: Some("2-3".into()),
            cod_available: false,
        }
    }

    fn client(server: &MockServer) -> KomerceShippingClient {
        KomerceShippingClient::with_timeout(server.uri(), "test-key", Duration::from_millis(500))
            .unwrap()
    }

    #[test]
    fn resolve_destination_requires_all_three_names() {
        let candidates = vec![
            destination("1", "Sawangan", "Sawangan", "Depok"),
            destination("2", "Sawangan Baru", "Sawangan", "Depok"),
            destination("3", "Sawangan", "Sawangan", "Magelang"),
        ];

        let found = resolve_destination(&candidates, " sawangan ", "SAWANGAN", "depok").unwrap();
        assert_eq!(found.id, "1");

        let missing = resolve_destination(&candidates, "Sawangan", "Sawangan", "Bogor");
        assert!(matches!(
            missing,
            Err(ServiceError::AddressResolutionFailed(_))
        ));
    }

    #[test]
    fn resolve_destination_rejects_ambiguous_matches() {
        let candidates = vec![
            destination("1", "Pondok Petir", "Bojongsari", "Depok"),
            destination("9", "pondok petir", "Bojongsari", "Depok"),
        ];
        assert!(matches!(
            resolve_destination(&candidates, "Pondok Petir", "Bojongsari", "Depok"),
            Err(ServiceError::AddressResolutionFailed(_))
        ));

        let duplicated = vec![
            destination("4", "Cinere", "Cinere", "Depok"),
            destination("4", "Cinere", "Cinere", "Depok"),
        ];
        assert_eq!(
            resolve_destination(&duplicated, "Cinere", "Cinere", "Depok")
                .unwrap()
                .id,
            "4"
        );
    }

    #[test]
    fn select_quote_lists_alternatives_when_missing() {
        let quotes = vec![
            quote("JNE", "REG", dec!(15000)),
            quote("SiCepat", "BEST", dec!(21000)),
        ];

        let chosen = select_quote(&quotes, "jne", "reg").unwrap();
        assert_eq!(chosen.price, dec!(15000));

        match select_quote(&quotes, "JNE", "YES") {
            Err(ServiceError::ShippingServiceUnavailable { available, .. }) => {
                assert_eq!(available, vec!["JNE - REG", "SiCepat - BEST"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn weight_is_sent_in_kilograms() {
        assert_eq!(grams_to_kg_param(1000), "1.00");
        assert_eq!(grams_to_kg_param(1250), "1.25");
        assert_eq!(grams_to_kg_param(1), "0.01");
    }

    #[test]
    fn short_keywords_are_rejected() {
        assert!(normalize_keyword("  ab ", 3).is_err());
        assert_eq!(normalize_keyword(" abc ", 3).unwrap(), "abc");
    }

    #[tokio::test]
    async fn search_destinations_parses_numeric_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .and(query_param("keyword", "sawangan"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": { "code": 200, "message": "Success", "status": "success" },
                "data": [{
                    "id": 17473,
                    "label": "SAWANGAN, SAWANGAN, DEPOK, JAWA BARAT, 16511",
                    "subdistrict_name": "SAWANGAN",
                    "district_name": "SAWANGAN",
                    "city_name": "DEPOK",
                    "zip_code": "16511"
                }]
            })))
            .mount(&server)
            .await;

        let results = client(&server).search_destinations(" sawangan ").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "17473");
        assert_eq!(results[0].zip_code.as_deref(), Some("16511"));
    }

    #[tokio::test]
    async fn search_with_short_keyword_never_calls_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server).search_destinations("ab").await.unwrap_err();
        assert!(matches!(err, ShippingProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn calculate_filters_by_courier_and_maps_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CALCULATE_PATH))
            .and(query_param("weight", "1.00"))
            .and(query_param("item_value", "100000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": { "code": 200, "message": "Success" },
                "data": {
                    "calculate_reguler": [
                        { "shipping_name": "JNE", "service_name": "REG", "shipping_cost": 15000, "etd": "2-3 day", "is_cod": true },
                        { "shipping_name": "SICEPAT", "service_name": "BEST", "shipping_cost": 21000, "etd": "", "is_cod": false }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let query = RateQuery {
            origin: "31597".into(),
            destination: "17473".into(),
            weight_grams: 1000,
            declared_value: dec!(100000),
            courier: Some("jne".into()),
        };
        let quotes = client(&server).calculate_shipping_cost(&query).await.unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].price, dec!(15000));
        assert_eq!(quotes[0].estimated_days.as_deref(), Some("2-3 day"));
        assert!(quotes[0].cod_available);
    }

    #[tokio::test]
    async fn upstream_failures_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .and(query_param("keyword", "error"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "meta": { "code": 500, "message": "internal failure" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .and(query_param("keyword", "garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .and(query_param("keyword", "unauthorized"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": { "code": "401", "message": "invalid api key" },
                "data": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .and(query_param("keyword", "slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(
            client.search_destinations("error").await.unwrap_err(),
            ShippingProviderError::Upstream {
                status: 500,
                message: "internal failure".into()
            }
        );
        assert!(matches!(
            client.search_destinations("garbage").await.unwrap_err(),
            ShippingProviderError::Malformed(_)
        ));
        assert_eq!(
            client.search_destinations("unauthorized").await.unwrap_err(),
            ShippingProviderError::Upstream {
                status: 401,
                message: "invalid api key".into()
            }
        );
        assert_eq!(
            client.search_destinations("slow").await.unwrap_err(),
            ShippingProviderError::Timeout
        );
    }
}
