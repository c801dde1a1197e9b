//! REST store client.
//!
//! Speaks the record-store REST API: SOQL queries with `nextRecordsUrl`
//! paging, `sobjects` describe and create, `composite/sobjects` for
//! multi-record create, and `VersionData` for file binaries.

use crate::config::ResolvedStore;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace};

use super::{CreateOutcome, ObjectSchema, QueryPage, Store};

/// Composite create accepts at most this many records per request.
const COMPOSITE_LIMIT: usize = 200;

/// Request timeout. Binary downloads of large versions dominate.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Store handle backed by the REST API of one instance.
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    token: String,
    identity: String,
}

/// Error body shape returned on non-2xx responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    message: String,
    #[serde(default)]
    error_code: Option<String>,
}

impl RestStore {
    /// Open a handle using already-resolved connection settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the instance URL is not http(s), or an
    /// HTTP error if the client cannot be built.
    pub fn new(settings: &ResolvedStore) -> Result<Self> {
        let base_url = settings.instance_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "Instance URL must start with https:// (got '{base_url}')"
            )));
        }

        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            identity: normalize_identity(&base_url),
            base_url,
            api_version: settings.api_version.trim_start_matches('v').to_string(),
            token: settings.access_token.clone(),
        })
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/services/data/v{}/{}",
            self.base_url,
            self.api_version,
            path.trim_start_matches('/')
        )
    }

    /// Turn a non-2xx response into `Error::Store` with the API message.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Vec<ApiError>>(&body)
            .ok()
            .and_then(|errors| errors.into_iter().next())
            .map_or(body, |e| match e.error_code {
                Some(code) => format!("{code}: {}", e.message),
                None => e.message,
            });

        Err(Error::Store {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        trace!(url, "GET");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T> {
        trace!(url, "POST");
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

/// Identity of an instance: its base URL, lowercased, without trailing slash.
#[must_use]
pub fn normalize_identity(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}

impl Store for RestStore {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn query(&self, soql: &str) -> Result<QueryPage> {
        debug!(store = %self.identity, soql, "query");
        self.get_json(&self.data_url("query"), &[("q", soql)]).await
    }

    async fn query_more(&self, next: &str) -> Result<QueryPage> {
        let url = if next.starts_with("http") {
            next.to_string()
        } else {
            format!("{}{}", self.base_url, next)
        };
        self.get_json(&url, &[]).await
    }

    async fn describe(&self, object: &str) -> Result<ObjectSchema> {
        self.get_json(&self.data_url(&format!("sobjects/{object}/describe")), &[])
            .await
    }

    async fn fetch_version_data(&self, version_id: &str) -> Result<Vec<u8>> {
        let url = self.data_url(&format!("sobjects/ContentVersion/{version_id}/VersionData"));
        trace!(url, "GET binary");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn create(&self, object: &str, records: Vec<Value>) -> Result<Vec<CreateOutcome>> {
        match records.len() {
            0 => Ok(Vec::new()),
            1 => {
                let record = records.into_iter().next().unwrap_or(Value::Null);
                let url = self.data_url(&format!("sobjects/{object}"));
                match self.post_json::<CreateOutcome>(&url, &record).await {
                    Ok(outcome) => Ok(vec![outcome]),
                    // A rejected single insert is a per-record failure, not a failed request.
                    Err(Error::Store { status, message }) if status == 400 => {
                        Ok(vec![CreateOutcome {
                            id: None,
                            success: false,
                            errors: vec![super::StoreMessage {
                                status_code: Some(status.to_string()),
                                message,
                            }],
                        }])
                    }
                    Err(e) => Err(e),
                }
            }
            n if n > COMPOSITE_LIMIT => Err(Error::InvalidArgument(format!(
                "create accepts at most {COMPOSITE_LIMIT} records per call (got {n})"
            ))),
            _ => {
                let records: Vec<Value> = records
                    .into_iter()
                    .map(|mut r| {
                        if let Some(obj) = r.as_object_mut() {
                            obj.insert("attributes".into(), json!({ "type": object }));
                        }
                        r
                    })
                    .collect();
                let body = json!({ "allOrNone": false, "records": records });
                self.post_json(&self.data_url("composite/sobjects"), &body)
                    .await
            }
        }
    }
}
