use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::info;

use crate::{
    error::Error, helpers::floor_hour, model::MP_Price, types::MarketDataRange,
};

/// Upstream price/rate reference. The descendant price indexer pulls
/// hourly points through this seam.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_range(
        &self,
        reference: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MP_Price>, Error>;
}

#[derive(Debug)]
pub struct Http {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl Http {
    pub fn new(base_url: String, timeout: Duration) -> Result<Http, Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Http {
            client,
            base_url,
            timeout,
        })
    }

    fn market_data_range_url(
        &self,
        reference: &str,
        from: i64,
        to: i64,
    ) -> String {
        format!(
            "{}/coins/{}/market_chart/range?vs_currency=usd&from={}&to={}",
            self.base_url, reference, from, to
        )
    }
}

#[async_trait]
impl PriceSource for Http {
    async fn fetch_range(
        &self,
        reference: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MP_Price>, Error> {
        // Inclusive hour range: stretch `to` across its whole hour.
        let url = self.market_data_range_url(
            reference,
            from.timestamp(),
            to.timestamp() + 3599,
        );
        info!("{}", &url);

        let response = match timeout(
            self.timeout,
            self.client.get(url).send(),
        )
        .await
        {
            Err(_) => {
                return Err(Error::ProviderUnavailable(format!(
                    "price source timed out for {}",
                    reference
                )))
            },
            Ok(Err(e)) => {
                return Err(Error::ProviderUnavailable(e.to_string()))
            },
            Ok(Ok(response)) => response,
        };

        if !response.status().is_success() {
            return Err(Error::ProviderUnavailable(format!(
                "price source status {} for {}",
                response.status(),
                reference
            )));
        }

        let body = response.json::<MarketDataRange>().await.map_err(|e| {
            Error::ProviderProtocolError(format!(
                "malformed price body for {}: {}",
                reference, e
            ))
        })?;

        hourly_points(reference, &body)
    }
}

/// Collapses raw samples to one point per hour boundary, first sample
/// in the hour wins.
fn hourly_points(
    reference: &str,
    body: &MarketDataRange,
) -> Result<Vec<MP_Price>, Error> {
    let mut by_hour: BTreeMap<DateTime<Utc>, BigDecimal> = BTreeMap::new();

    for (millis, price) in &body.prices {
        let Some(at) = DateTime::from_timestamp_millis(*millis) else {
            continue;
        };
        let hour = floor_hour(at);
        let factor = BigDecimal::try_from(*price).map_err(|e| {
            Error::ProviderProtocolError(format!(
                "invalid price sample for {}: {}",
                reference, e
            ))
        })?;
        by_hour.entry(hour).or_insert(factor);
    }

    Ok(by_hour
        .into_iter()
        .map(|(hour, factor)| MP_Price {
            MP_reference: reference.to_owned(),
            MP_hour: hour,
            MP_factor: factor,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_hourly_points_collapse() {
        let body = MarketDataRange {
            prices: vec![
                (3_600_000, 10.0),
                (3_900_000, 11.0),
                (7_200_000, 12.5),
            ],
        };
        let points = hourly_points("ethereum", &body).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].MP_factor, BigDecimal::try_from(10.0).unwrap());
        assert_eq!(points[1].MP_hour.timestamp(), 7200);
    }

    #[tokio::test]
    async fn test_fetch_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/coins/ethereum/market_chart/range$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "prices": [[3_600_000, 10.0], [7_200_000, 12.5]]
            })))
            .mount(&server)
            .await;

        let http =
            Http::new(server.uri(), Duration::from_secs(5)).unwrap();
        let from = DateTime::from_timestamp(3600, 0).unwrap();
        let to = DateTime::from_timestamp(7200, 0).unwrap();
        let points = http.fetch_range("ethereum", from, to).await.unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].MP_reference, "ethereum");
    }

    #[tokio::test]
    async fn test_fetch_range_unavailable_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let http =
            Http::new(server.uri(), Duration::from_secs(5)).unwrap();
        let from = DateTime::from_timestamp(3600, 0).unwrap();
        let result = http.fetch_range("ethereum", from, from).await;
        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
    }
}
