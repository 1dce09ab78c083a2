//! Source-system client: HMAC-signed JSON:API requests with paging.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use aws_lc_rs::hmac;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use posture_migrator_common::{
    classify_transport_error, retry_with_backoff, ApiError, ApiResult, Attempt, RetryError, RetryPolicy,
};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, DATE};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use url::Url;

use crate::catalog::regions::target_region_code;
use crate::clients::{AccountDetail, SourceApi};
use crate::types::{
    AccessLevel, CloudProvider, ExternalAccount, SourceRegion, SourceRole, SourceUser, Suppression, Team,
};

pub const DEFAULT_SOURCE_URL: &str = "https://api.evident.io";

const MEDIA_TYPE: &str = "application/vnd.api+json";
/// Base64 MD5 of an empty body. Every source call is a bodiless GET.
const EMPTY_CONTENT_MD5: &str = "1B2M2Y8AsgTpgAmY7PhCfg==";
const PAGE_SIZE: u32 = 100;
/// Source role id of managers; every other role is a customer.
const MANAGER_ROLE_ID: &str = "2";

const ORGANIZATIONS_PATH: &str = "/api/v2/organizations";
const TEAMS_PATH: &str = "/api/v2/teams";
const USERS_PATH: &str = "/api/v2/users";
const EXTERNAL_ACCOUNTS_PATH: &str = "/api/v2/external_accounts";
const REGIONS_PATH: &str = "/api/v2/regions";
const SUPPRESSIONS_PATH: &str = "/api/v2/suppressions";

#[derive(Clone)]
pub struct SourceCredentials {
    pub public_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("public_key", &self.public_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

pub struct SourceClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: SourceCredentials,
    retry: RetryPolicy,
}

impl SourceClient {
    pub fn new(
        base_url: &str,
        credentials: SourceCredentials,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Config(format!("invalid source URL '{base_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            credentials,
            retry,
        })
    }

    /// `Authorization` header value for a bodiless request.
    pub fn authorization(&self, method: &str, path_and_query: &str, date: &str) -> String {
        let canonical = format!("{method},{MEDIA_TYPE},{EMPTY_CONTENT_MD5},{path_and_query},{date}");
        let key = hmac::Key::new(
            hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            self.credentials.secret_key.as_bytes(),
        );
        let tag = hmac::sign(&key, canonical.as_bytes());
        format!(
            "APIAuth {}:{}",
            self.credentials.public_key,
            BASE64_STANDARD.encode(tag.as_ref())
        )
    }

    fn resolve(&self, link: &str) -> ApiResult<Url> {
        self.base_url
            .join(link)
            .map_err(|e| ApiError::InvalidResponse(format!("bad link '{link}': {e}")))
    }

    async fn attempt_get(&self, url: &Url) -> Attempt<Option<Document>, ApiError> {
        let date = http_date(Utc::now());
        let authorization = self.authorization("GET", &path_and_query(url), &date);

        let response = match self
            .http
            .get(url.clone())
            .header(DATE, &date)
            .header("Content-MD5", EMPTY_CONTENT_MD5)
            .header(CONTENT_TYPE, MEDIA_TYPE)
            .header(ACCEPT, MEDIA_TYPE)
            .header(AUTHORIZATION, authorization)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return ApiError::into_attempt(Err(classify_transport_error(&e))),
        };

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Attempt::Success(None),
            StatusCode::TOO_MANY_REQUESTS => return Attempt::Retryable(ApiError::RateLimited("source".into())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Attempt::Fatal(ApiError::Authentication(format!(
                    "source rejected the API keys ({status})"
                )))
            }
            _ => {}
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return ApiError::into_attempt(Err(classify_transport_error(&e))),
        };

        // A garbled body is how the source signals throttling on some paths
        let document: Document = match serde_json::from_slice(&body) {
            Ok(document) => document,
            Err(e) => {
                return Attempt::Retryable(ApiError::InvalidResponse(format!(
                    "non-JSON body from {} ({status}): {e}",
                    url.path()
                )))
            }
        };

        if let Some(error) = document.errors.first() {
            return match error.status {
                429 => Attempt::Retryable(ApiError::RateLimited("source".into())),
                404 => Attempt::Success(None),
                status => ApiError::into_attempt(Err(ApiError::Status {
                    status,
                    message: error.title.clone().unwrap_or_default(),
                })),
            };
        }

        if !status.is_success() {
            return ApiError::into_attempt(Err(ApiError::Status {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            }));
        }

        Attempt::Success(Some(document))
    }

    async fn get_document(&self, link: &str) -> ApiResult<Option<Document>> {
        let url = self.resolve(link)?;
        let url = &url;
        let operation = format!("GET {}", url.path());
        retry_with_backoff(&self.retry, &operation, move |_| self.attempt_get(url))
            .await
            .map_err(RetryError::into_inner)
    }

    /// Fetch one resource; `None` when it does not exist.
    async fn get_one(&self, link: &str) -> ApiResult<Option<Resource>> {
        Ok(self
            .get_document(link)
            .await?
            .and_then(|document| document.data.into_iter().next()))
    }

    /// Fetch every page of a collection, following `links.next`.
    async fn get_all(&self, first: &str) -> ApiResult<Vec<Resource>> {
        let mut resources = Vec::new();
        let mut next = Some(first.to_string());
        let mut pages = 0;
        while let Some(link) = next.take() {
            let Some(document) = self.get_document(&link).await? else {
                break;
            };
            pages += 1;
            next = document.links.next.clone();
            resources.extend(document.data.into_iter());
        }
        log::trace!("{first}: {} resources over {pages} pages", resources.len());
        Ok(resources)
    }

    /// Ids of a to-many relationship, following its link when present.
    async fn related_ids(&self, resource: &Resource, name: &str) -> ApiResult<Vec<String>> {
        match resource.related_link(name) {
            Some(link) => Ok(self
                .get_all(&paged(link))
                .await?
                .into_iter()
                .map(|r| r.id)
                .collect()),
            None => Ok(resource.relationship_ids(name)),
        }
    }

    async fn team_name(&self, account: &Resource) -> ApiResult<Option<String>> {
        let Some(link) = account.related_link("team") else {
            return Ok(None);
        };
        Ok(self
            .get_one(link)
            .await?
            .and_then(|team| team.attribute("name").map(str::to_string)))
    }

    async fn cloud_account_id(&self, account: &Resource, provider: CloudProvider) -> ApiResult<String> {
        let Some(link) = account.related_link("credentials") else {
            return Ok(String::new());
        };
        let Some(credentials) = self.get_one(link).await? else {
            return Ok(String::new());
        };
        let key = match provider {
            CloudProvider::Aws => "account",
            CloudProvider::Azure => "subscription_id",
        };
        Ok(credentials.attribute(key).unwrap_or_default().to_string())
    }
}

#[async_trait]
impl SourceApi for SourceClient {
    async fn organization_count(&self) -> ApiResult<usize> {
        Ok(self.get_all(ORGANIZATIONS_PATH).await?.len())
    }

    async fn teams(&self) -> ApiResult<Vec<Team>> {
        log::info!("Retrieving source teams");
        let mut teams = Vec::new();
        for resource in self.get_all(&paged(TEAMS_PATH)).await? {
            let external_account_ids = self.related_ids(&resource, "external_accounts").await?;
            teams.push(Team {
                name: resource.attribute("name").unwrap_or_default().to_string(),
                id: resource.id,
                external_account_ids,
            });
        }
        Ok(teams)
    }

    async fn users(&self) -> ApiResult<Vec<SourceUser>> {
        log::info!("Retrieving source users");
        let mut users = Vec::new();
        for resource in self.get_all(&paged(USERS_PATH)).await? {
            let access_level = match resource.attribute("access_level") {
                Some("organization_level") => AccessLevel::OrganizationLevel,
                _ => AccessLevel::TeamLevel,
            };
            let role = if resource.related_id("role").as_deref() == Some(MANAGER_ROLE_ID) {
                SourceRole::Manager
            } else {
                SourceRole::Customer
            };

            let mut team_names = Vec::new();
            if access_level == AccessLevel::TeamLevel {
                // Users without any team have a null link
                if let Some(link) = resource.related_link("teams") {
                    team_names = self
                        .get_all(&paged(link))
                        .await?
                        .iter()
                        .filter_map(|team| team.attribute("name").map(str::to_string))
                        .collect();
                }
            }

            users.push(SourceUser {
                first_name: resource.attribute("first_name").unwrap_or_default().to_string(),
                last_name: resource.attribute("last_name").unwrap_or_default().to_string(),
                email: resource.attribute("email").unwrap_or_default().to_string(),
                access_level,
                role,
                time_zone: resource.attribute("time_zone").map(str::to_string),
                team_names,
            });
        }
        Ok(users)
    }

    async fn external_accounts(&self, detail: AccountDetail) -> ApiResult<Vec<ExternalAccount>> {
        log::info!("Retrieving source external accounts ({detail:?})");
        let mut accounts = Vec::new();
        for resource in self.get_all(&paged(EXTERNAL_ACCOUNTS_PATH)).await? {
            let provider = resource.attribute("provider").and_then(CloudProvider::parse);
            let cloud_account_id = match provider {
                Some(provider) => self.cloud_account_id(&resource, provider).await?,
                None => String::new(),
            };

            let (disabled_signature_ids, team_name) = match detail {
                AccountDetail::Basic => (BTreeSet::new(), None),
                AccountDetail::Detailed => (
                    self.related_ids(&resource, "disabled_signatures")
                        .await?
                        .into_iter()
                        .collect(),
                    self.team_name(&resource).await?,
                ),
            };

            accounts.push(ExternalAccount {
                name: resource.attribute("name").unwrap_or_default().to_string(),
                id: resource.id,
                provider,
                cloud_account_id,
                disabled_signature_ids,
                team_name,
            });
        }
        Ok(accounts)
    }

    async fn regions(&self) -> ApiResult<Vec<SourceRegion>> {
        log::info!("Retrieving source regions");
        Ok(self
            .get_all(&paged(REGIONS_PATH))
            .await?
            .into_iter()
            .filter_map(|resource| {
                let provider = resource.attribute("provider").and_then(CloudProvider::parse)?;
                let code = target_region_code(provider, resource.attribute("code")?);
                Some(SourceRegion {
                    id: resource.id,
                    provider,
                    code,
                })
            })
            .collect())
    }

    async fn suppressions(&self) -> ApiResult<Vec<Suppression>> {
        log::info!("Retrieving source suppressions");
        let first = format!(
            "{}&filter[status_eq]=active&include=regions,external_accounts,signatures,custom_signatures",
            paged(SUPPRESSIONS_PATH)
        );
        Ok(self
            .get_all(&first)
            .await?
            .into_iter()
            .map(|resource| Suppression {
                resource_scope: resource.attribute("resource").unwrap_or_default().to_string(),
                region_ids: resource.relationship_ids("regions").into_iter().collect(),
                external_account_ids: resource.relationship_ids("external_accounts").into_iter().collect(),
                signature_ids: resource.relationship_ids("signatures").into_iter().collect(),
                custom_signature_ids: resource.relationship_ids("custom_signatures").into_iter().collect(),
                id: resource.id,
            })
            .collect())
    }
}

/// RFC 7231 date, as the signature expects.
fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn paged(link: &str) -> String {
    let separator = if link.contains('?') { '&' } else { '?' };
    format!("{link}{separator}page[size]={PAGE_SIZE}")
}

/// Trailing id of a resource link such as `.../signatures/1003.json`.
fn id_from_link(link: &str) -> Option<String> {
    let last = link.trim_end_matches('/').rsplit('/').next()?;
    let id = last.split('.').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

// ---------------------------------------------------------------------------
// JSON:API wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default)]
    data: PrimaryData,
    #[serde(default)]
    links: Links,
    #[serde(default)]
    errors: Vec<ErrorObject>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum PrimaryData {
    Many(Vec<Resource>),
    One(Box<Resource>),
    #[default]
    Empty,
}

impl IntoIterator for PrimaryData {
    type Item = Resource;
    type IntoIter = std::vec::IntoIter<Resource>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            Self::Many(resources) => resources.into_iter(),
            Self::One(resource) => vec![*resource].into_iter(),
            Self::Empty => Vec::new().into_iter(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    #[serde(deserialize_with = "status_code")]
    status: u16,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Resource {
    #[serde(default, deserialize_with = "string_id")]
    id: String,
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
    #[serde(default)]
    relationships: HashMap<String, Relationship>,
}

impl Resource {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    fn related_link(&self, name: &str) -> Option<&str> {
        self.relationships
            .get(name)
            .and_then(|r| r.links.related.as_deref())
    }

    fn relationship_ids(&self, name: &str) -> Vec<String> {
        match self.relationships.get(name).and_then(|r| r.data.as_ref()) {
            Some(RelationshipData::Many(ids)) => ids.iter().map(|i| i.id.clone()).collect(),
            Some(RelationshipData::One(id)) => vec![id.id.clone()],
            None => Vec::new(),
        }
    }

    /// Id of a to-one relationship, from its data or its link.
    fn related_id(&self, name: &str) -> Option<String> {
        self.relationship_ids(name)
            .into_iter()
            .next()
            .or_else(|| self.related_link(name).and_then(id_from_link))
    }
}

#[derive(Debug, Default, Deserialize)]
struct Relationship {
    #[serde(default)]
    data: Option<RelationshipData>,
    #[serde(default)]
    links: RelationshipLinks,
}

#[derive(Debug, Default, Deserialize)]
struct RelationshipLinks {
    #[serde(default)]
    related: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelationshipData {
    Many(Vec<ResourceIdentifier>),
    One(ResourceIdentifier),
}

#[derive(Debug, Deserialize)]
struct ResourceIdentifier {
    #[serde(deserialize_with = "string_id")]
    id: String,
}

fn string_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("unexpected id {other}"))),
    }
}

fn status_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        _ => None,
    };
    parsed.ok_or_else(|| serde::de::Error::custom(format!("unexpected status {value}")))
}
