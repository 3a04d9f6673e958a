//! GraphQL-over-HTTP downstream collaborator
//!
//! Sends `{query, variables}` JSON to an upstream GraphQL endpoint. Ids
//! always travel as variables, never spliced into the query text.
//!
//! Failure classification:
//! - transport error, timeout or non-2xx status: [`FetchError::Unavailable`]
//! - `data.<field>` is `null`, or the upstream reports a "not found"
//!   error: [`FetchError::NotFound`]
//! - anything else that does not match the expected shape:
//!   [`FetchError::Malformed`]

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::model::{Product, User};
use super::{align_by_id, DownstreamClient, FetchError};
use crate::Result;

const USER_FIELDS: &str = "id name email";
const PRODUCT_FIELDS: &str = "id name description price category owner { id name email }";

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlErrorBody>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorBody {
    message: String,
}

/// Minimal GraphQL HTTP client bound to one endpoint
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    endpoint: String,
    http: reqwest::Client,
}

impl GraphQlClient {
    /// Create a client. `timeout` bounds each request end to end.
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            endpoint: endpoint.into(),
            http: builder.build()?,
        })
    }

    /// Upstream endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run `query` and decode `data.<field>`. `Ok(None)` means the field
    /// came back `null`.
    pub async fn query_field<T>(
        &self,
        query: &str,
        variables: Value,
        field: &str,
    ) -> std::result::Result<Option<T>, FetchError>
    where
        T: DeserializeOwned,
    {
        debug!(endpoint = %self.endpoint, field = %field, "Sending upstream query");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint = %self.endpoint, status = %status, "Upstream returned error status");
            return Err(FetchError::Unavailable(format!(
                "{} responded with {}",
                self.endpoint, status
            )));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        decode_field(&body, field)
    }
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Unavailable(format!("request timed out: {e}"))
    } else {
        FetchError::Unavailable(e.to_string())
    }
}

/// Decode `data.<field>` from a GraphQL response body.
pub(crate) fn decode_field<T>(body: &[u8], field: &str) -> std::result::Result<Option<T>, FetchError>
where
    T: DeserializeOwned,
{
    let response: GraphQlResponse = serde_json::from_slice(body)
        .map_err(|e| FetchError::Malformed(format!("invalid GraphQL response: {e}")))?;

    let GraphQlResponse { data, errors } = response;
    let errors = errors.unwrap_or_default();
    let value = data
        .as_ref()
        .and_then(|data| data.as_object())
        .and_then(|data| data.get(field));

    match value {
        Some(Value::Null) | None if !errors.is_empty() => {
            let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
            let joined = messages.join("; ");
            if messages.iter().any(|m| m.to_lowercase().contains("not found")) {
                Err(FetchError::NotFound(joined))
            } else {
                Err(FetchError::Malformed(format!("upstream errors: {joined}")))
            }
        }
        Some(Value::Null) => Ok(None),
        None => Err(FetchError::Malformed(format!("missing field `{field}`"))),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| FetchError::Malformed(format!("unexpected `{field}` shape: {e}"))),
    }
}

/// Users upstream
#[derive(Debug, Clone)]
pub struct UsersClient {
    graphql: GraphQlClient,
}

impl UsersClient {
    /// Wrap a GraphQL client pointed at the users service
    pub fn new(graphql: GraphQlClient) -> Self {
        Self { graphql }
    }
}

#[async_trait]
impl DownstreamClient for UsersClient {
    type Entity = User;

    fn name(&self) -> &str {
        "users"
    }

    async fn fetch_by_id(&self, id: &str) -> std::result::Result<User, FetchError> {
        let query = format!("query UserById($id: ID!) {{ user(id: $id) {{ {USER_FIELDS} }} }}");
        self.graphql
            .query_field(&query, json!({ "id": id }), "user")
            .await?
            .ok_or_else(|| FetchError::NotFound(id.to_string()))
    }

    async fn fetch_by_ids(
        &self,
        ids: &[String],
    ) -> std::result::Result<Vec<std::result::Result<User, FetchError>>, FetchError> {
        let query = format!(
            "query UsersByIds($ids: [ID!]!) {{ usersByIds(ids: $ids) {{ {USER_FIELDS} }} }}"
        );
        let found: Vec<User> = self
            .graphql
            .query_field(&query, json!({ "ids": ids }), "usersByIds")
            .await?
            .unwrap_or_default();
        Ok(align_by_id(ids, found))
    }
}

/// Products upstream
#[derive(Debug, Clone)]
pub struct ProductsClient {
    graphql: GraphQlClient,
}

impl ProductsClient {
    /// Wrap a GraphQL client pointed at the products service
    pub fn new(graphql: GraphQlClient) -> Self {
        Self { graphql }
    }
}

#[async_trait]
impl DownstreamClient for ProductsClient {
    type Entity = Product;

    fn name(&self) -> &str {
        "products"
    }

    async fn fetch_by_id(&self, id: &str) -> std::result::Result<Product, FetchError> {
        let query =
            format!("query ProductById($id: ID!) {{ product(id: $id) {{ {PRODUCT_FIELDS} }} }}");
        self.graphql
            .query_field(&query, json!({ "id": id }), "product")
            .await?
            .ok_or_else(|| FetchError::NotFound(id.to_string()))
    }

    async fn fetch_by_ids(
        &self,
        ids: &[String],
    ) -> std::result::Result<Vec<std::result::Result<Product, FetchError>>, FetchError> {
        let query = format!(
            "query ProductsByIds($ids: [ID!]!) {{ productsByIds(ids: $ids) {{ {PRODUCT_FIELDS} }} }}"
        );
        let found: Vec<Product> = self
            .graphql
            .query_field(&query, json!({ "ids": ids }), "productsByIds")
            .await?
            .unwrap_or_default();
        Ok(align_by_id(ids, found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_present_entity() {
        let body = br#"{"data":{"user":{"id":"1","name":"Alice","email":"alice@example.com"}}}"#;
        let user: Option<User> = decode_field(body, "user").unwrap();
        assert_eq!(user.unwrap().name, "Alice");
    }

    #[test]
    fn test_decode_null_field() {
        let body = br#"{"data":{"user":null}}"#;
        let user: Option<User> = decode_field(body, "user").unwrap();
        assert!(user.is_none());
    }

    #[test]
    fn test_decode_not_found_error() {
        let body = br#"{"data":{"product":null},"errors":[{"message":"product not found"}]}"#;
        let err = decode_field::<Product>(body, "product").unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[test]
    fn test_decode_other_upstream_error() {
        let body = br#"{"errors":[{"message":"Cannot query field \"user\""}]}"#;
        let err = decode_field::<User>(body, "user").unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn test_decode_shape_mismatch() {
        let body = br#"{"data":{"user":{"id":1}}}"#;
        assert!(matches!(
            decode_field::<User>(body, "user"),
            Err(FetchError::Malformed(_))
        ));

        assert!(matches!(
            decode_field::<User>(b"<html>bad gateway</html>", "user"),
            Err(FetchError::Malformed(_))
        ));

        assert!(matches!(
            decode_field::<User>(br#"{"data":{}}"#, "user"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_list_field() {
        let body = br#"{"data":{"usersByIds":[{"id":"2","name":"Bob","email":"bob@example.com"}]}}"#;
        let users: Option<Vec<User>> = decode_field(body, "usersByIds").unwrap();
        assert_eq!(users.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_unavailable() {
        let client = UsersClient::new(
            GraphQlClient::new("http://127.0.0.1:9/query", Some(Duration::from_millis(500))).unwrap(),
        );
        let err = client.fetch_by_id("1").await.unwrap_err();
        assert!(matches!(err, FetchError::Unavailable(_)));
    }
}
