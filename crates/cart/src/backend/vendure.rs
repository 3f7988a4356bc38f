//! GraphQL-over-HTTP implementation of [`CommerceBackend`].
//!
//! Talks to the commerce backend's shop API with plain `reqwest` and
//! hand-written query documents. Rate limiting and GraphQL error lists are
//! surfaced as structured [`BackendError`] values; the caller decides how to
//! retry.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{error, instrument};

use sugarloaf_core::{CustomerId, VariantId};

use crate::config::BackendConfig;

use super::{
    BackendError, CommerceBackend, OrderHandle, OrderLineInput, PaymentOutcome, Promotion,
    StockInfo,
};

/// Client for the commerce backend's shop API.
#[derive(Clone)]
pub struct VendureClient {
    inner: Arc<VendureClientInner>,
}

struct VendureClientInner {
    client: reqwest::Client,
    endpoint: String,
    channel_token: String,
}

#[derive(Deserialize)]
struct GraphQLResponse {
    data: Option<serde_json::Value>,
    errors: Option<Vec<GraphQLResponseError>>,
}

#[derive(Deserialize)]
struct GraphQLResponseError {
    message: String,
}

impl VendureClient {
    /// Create a new shop API client.
    #[must_use]
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            inner: Arc::new(VendureClientInner {
                client: reqwest::Client::new(),
                endpoint: config.endpoint.clone(),
                channel_token: config.channel_token.expose_secret().to_string(),
            }),
        }
    }

    /// Execute a GraphQL document.
    async fn execute(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, BackendError> {
        let response = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .header("vendure-token", &self.inner.channel_token)
            .header("Content-Type", "application/json")
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();

        // Check for rate limiting
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(BackendError::RateLimited(retry_after));
        }

        // Get response body as text first for better error diagnostics
        let response_text = response.text().await?;

        if !status.is_success() {
            error!(
                status = %status,
                body = %response_text.chars().take(500).collect::<String>(),
                "Shop API returned non-success status"
            );
            return Err(BackendError::GraphQL(vec![format!(
                "HTTP {status}: {}",
                response_text.chars().take(200).collect::<String>()
            )]));
        }

        let response: GraphQLResponse = match serde_json::from_str(&response_text) {
            Ok(r) => r,
            Err(e) => {
                error!(
                    error = %e,
                    body = %response_text.chars().take(500).collect::<String>(),
                    "Failed to parse shop API GraphQL response"
                );
                return Err(BackendError::Parse(e));
            }
        };

        if let Some(errors) = response.errors
            && !errors.is_empty()
        {
            return Err(BackendError::GraphQL(
                errors.into_iter().map(|e| e.message).collect(),
            ));
        }

        response.data.ok_or_else(|| {
            BackendError::GraphQL(vec!["No data in response".to_string()])
        })
    }

    /// Extract and deserialize a top-level field of the response data.
    fn field<T: DeserializeOwned>(
        data: serde_json::Value,
        name: &str,
    ) -> Result<T, BackendError> {
        let value = data
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("response field: {name}")))?;
        Ok(serde_json::from_value(value)?)
    }
}

const STOCK_LEVELS_QUERY: &str = r"
query StockLevels($ids: [ID!]!) {
  productVariants(ids: $ids) {
    id
    stockAvailable
    priceWithTax
  }
}";

const PROMOTIONS_BY_CODE_QUERY: &str = r"
query PromotionsByCode($code: String!) {
  promotionsByCode(code: $code) {
    id
    couponCode
    name
    description
    enabled
    deletedAt
    createdAt
    startsAt
    endsAt
    conditions
    actions
    usageLimit
    perCustomerUsageLimit
  }
}";

const ACTIVE_VERIFICATIONS_QUERY: &str = r"
query ActiveVerifications($customerId: ID!) {
  activeVerifications(customerId: $customerId)
}";

const CUSTOMER_GROUPS_QUERY: &str = r"
query CustomerGroups($customerId: ID!) {
  customerGroups(customerId: $customerId)
}";

const CREATE_ORDER_MUTATION: &str = r"
mutation CreateOrderFromCart($lines: [OrderLineInput!]!, $couponCode: String) {
  createOrderFromCart(lines: $lines, couponCode: $couponCode) {
    id
    code
  }
}";

const SETTLE_PAYMENT_MUTATION: &str = r"
mutation SettlePayment($orderId: ID!) {
  settlePayment(orderId: $orderId) {
    state
    errorMessage
  }
}";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantStockData {
    id: VariantId,
    stock_available: i64,
    price_with_tax: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentData {
    state: String,
    error_message: Option<String>,
}

impl CommerceBackend for VendureClient {
    #[instrument(skip(self), fields(count = ids.len()))]
    async fn stock_levels(
        &self,
        ids: &[VariantId],
    ) -> Result<HashMap<VariantId, StockInfo>, BackendError> {
        let data = self
            .execute(STOCK_LEVELS_QUERY, json!({ "ids": ids }))
            .await?;
        let variants: Vec<VariantStockData> = Self::field(data, "productVariants")?;
        Ok(variants
            .into_iter()
            .map(|v| {
                (
                    v.id,
                    StockInfo {
                        available: v.stock_available,
                        price: v.price_with_tax,
                    },
                )
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn promotions_by_code(&self, code: &str) -> Result<Vec<Promotion>, BackendError> {
        let data = self
            .execute(PROMOTIONS_BY_CODE_QUERY, json!({ "code": code }))
            .await?;
        Self::field(data, "promotionsByCode")
    }

    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn active_verifications(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<String>, BackendError> {
        let data = self
            .execute(
                ACTIVE_VERIFICATIONS_QUERY,
                json!({ "customerId": customer_id }),
            )
            .await?;
        Self::field(data, "activeVerifications")
    }

    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn customer_groups(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<String>, BackendError> {
        let data = self
            .execute(CUSTOMER_GROUPS_QUERY, json!({ "customerId": customer_id }))
            .await?;
        Self::field(data, "customerGroups")
    }

    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    async fn create_order(
        &self,
        lines: &[OrderLineInput],
        coupon_code: Option<&str>,
    ) -> Result<OrderHandle, BackendError> {
        let data = self
            .execute(
                CREATE_ORDER_MUTATION,
                json!({ "lines": lines, "couponCode": coupon_code }),
            )
            .await?;
        Self::field(data, "createOrderFromCart")
    }

    #[instrument(skip(self), fields(order_code = %order.code))]
    async fn create_payment(&self, order: &OrderHandle) -> Result<PaymentOutcome, BackendError> {
        let data = self
            .execute(SETTLE_PAYMENT_MUTATION, json!({ "orderId": order.id }))
            .await?;
        let payment: PaymentData = Self::field(data, "settlePayment")?;
        if payment.state == "Settled" {
            Ok(PaymentOutcome::Settled)
        } else {
            Ok(PaymentOutcome::Declined(
                payment
                    .error_message
                    .unwrap_or_else(|| format!("payment state: {}", payment.state)),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_client_is_cheaply_cloneable() {
        let client = VendureClient::new(&BackendConfig {
            endpoint: "https://shop.example.com/shop-api".to_string(),
            channel_token: SecretString::from("token-abc123"),
        });
        let clone = client.clone();
        assert!(Arc::ptr_eq(&client.inner, &clone.inner));
    }

    #[test]
    fn test_graphql_response_shape() {
        let raw = r#"{"data":{"customerGroups":["wholesale"]},"errors":null}"#;
        let response: GraphQLResponse = serde_json::from_str(raw).unwrap();
        assert!(response.errors.is_none());
        let groups: Vec<String> =
            VendureClient::field(response.data.unwrap(), "customerGroups").unwrap();
        assert_eq!(groups, vec!["wholesale".to_string()]);
    }

    #[test]
    fn test_field_missing_is_not_found() {
        let data = serde_json::json!({ "other": 1 });
        let err = VendureClient::field::<Vec<String>>(data, "customerGroups").unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }
}
