//! Atlassian Cloud client.
//!
//! Implements [`OwnershipService`] over the issue tracker's REST v3 API (issues,
//! filters, user directory) and the wiki's v1/v2 APIs (space permissions).
//!
//! Every request goes through [`AtlassianClient::send`], which is the one place
//! where HTTP status codes and transport failures are translated into
//! [`RemoteError`]. Response bodies are decoded by small pure functions so the
//! wire shapes can be tested without a server.

use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

use super::capability::{OwnershipService, PageCursor, TargetPage};
use super::error::{RemoteError, RemoteErrorKind, ResolveError};
use crate::config::Settings;
use crate::types::{
    AccountId, ResolvedIdentity, ScopeFilter, SpaceType, Target, TargetKind, UserField,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Wire Types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    account_id: String,
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueSearchResponse {
    #[serde(default)]
    issues: Vec<IssueRecord>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssueRecord {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterSearchResponse {
    #[serde(default)]
    values: Vec<FilterRecord>,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilterRecord {
    id: String,
}

/// Cursor-paged wiki v2 listing.
#[derive(Debug, Deserialize)]
struct WikiPage<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(default, rename = "_links")]
    links: WikiLinks,
}

#[derive(Debug, Default, Deserialize)]
struct WikiLinks {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpaceRecord {
    id: String,
    key: String,
    #[serde(default, rename = "type")]
    space_type: String,
}

/// A space together with the accounts holding a user permission on it.
#[derive(Debug, Clone)]
struct IndexedSpace {
    id: String,
    key: String,
    space_type: SpaceType,
    holders: Vec<String>,
}

impl IndexedSpace {
    fn held_by(&self, account: &AccountId) -> bool {
        self.holders.iter().any(|h| h == account.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SpacePermission {
    id: String,
    principal: Principal,
    operation: PermissionOperation,
}

#[derive(Debug, Clone, Deserialize)]
struct Principal {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionOperation {
    key: String,
    target_type: String,
}

impl SpacePermission {
    fn held_by(&self, account: &AccountId) -> bool {
        self.principal.kind == "user" && self.principal.id == account.as_str()
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// HTTP client for one Atlassian site.
pub struct AtlassianClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    api_token: String,
    page_size: u32,
    /// The wiki admin key must be acquired once before listing every space.
    admin_key: OnceCell<()>,
    /// Every space and its user permission holders, listed once per client.
    space_index: OnceCell<Vec<IndexedSpace>>,
}

impl AtlassianClient {
    /// Creates a client from validated settings.
    pub fn new(settings: &Settings) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("owner-remap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::from_reqwest(&e))?;

        Ok(AtlassianClient {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            email: settings.email.clone(),
            api_token: settings.api_token.clone(),
            page_size: settings.page_size,
            admin_key: OnceCell::new(),
            space_index: OnceCell::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the account the credentials belong to.
    pub async fn current_user(&self) -> Result<ResolvedIdentity, RemoteError> {
        let json = self
            .send(self.request(Method::GET, "/rest/api/3/myself"))
            .await?;
        let user: UserRecord = decode(json)?;
        Ok(identity_from_record(self.email.clone(), user))
    }

    fn request(&self, method: Method, path_or_url: &str) -> RequestBuilder {
        // Next-page links come back either absolute or site-relative.
        let url = if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        };
        self.http
            .request(method, url)
            .basic_auth(&self.email, Some(&self.api_token))
            .header(reqwest::header::ACCEPT, "application/json")
    }

    /// Sends a request and translates any failure into a [`RemoteError`].
    ///
    /// Returns `Value::Null` for empty success bodies (e.g. HTTP 204).
    async fn send(&self, request: RequestBuilder) -> Result<Value, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(&e))?;
        let status = response.status();
        trace!(status = status.as_u16(), url = %response.url(), "Response received");

        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::from_reqwest(&e))?;

        if !status.is_success() {
            return Err(RemoteError::from_response(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(RemoteError::malformed)
    }

    async fn acquire_admin_key(&self) -> Result<(), RemoteError> {
        self.admin_key
            .get_or_try_init(|| async {
                debug!("Acquiring wiki admin key");
                self.send(self.request(Method::POST, "/wiki/api/v2/admin-key"))
                    .await
                    .map(|_| ())
            })
            .await
            .copied()
    }

    async fn search_issues(
        &self,
        field: UserField,
        owner: &AccountId,
        scope: Option<&ScopeFilter>,
        cursor: Option<&PageCursor>,
    ) -> Result<TargetPage, RemoteError> {
        let jql = issue_jql(field, owner, scope);
        let page_size = self.page_size.to_string();
        let mut request = self
            .request(Method::GET, "/rest/api/3/search/jql")
            .query(&[
                ("jql", jql.as_str()),
                ("fields", "key"),
                ("maxResults", page_size.as_str()),
            ]);
        if let Some(cursor) = cursor {
            request = request.query(&[("nextPageToken", cursor.as_str())]);
        }
        issue_page(self.send(request).await?, field)
    }

    async fn search_filters(
        &self,
        owner: &AccountId,
        cursor: Option<&PageCursor>,
    ) -> Result<TargetPage, RemoteError> {
        let page_size = self.page_size.to_string();
        let request = match cursor {
            Some(next) => self.request(Method::GET, next.as_str()),
            None => self.request(Method::GET, "/rest/api/3/filter/search").query(&[
                ("accountId", owner.as_str()),
                ("overrideSharePermissions", "true"),
                ("maxResults", page_size.as_str()),
            ]),
        };
        filter_page(self.send(request).await?)
    }

    /// Returns the spaces where `owner` holds a user permission.
    ///
    /// The site-wide space listing is built on first use and shared by every
    /// later search, so a run scans the site once however many entries it has.
    /// The listing is a snapshot: permissions are re-read when a space is
    /// actually moved.
    async fn search_spaces(&self, owner: &AccountId) -> Result<TargetPage, RemoteError> {
        let index = self.space_index.get_or_try_init(|| self.index_spaces()).await?;
        let items = index
            .iter()
            .filter(|space| space.held_by(owner))
            .map(|space| Target::space(space.id.clone(), space.key.clone(), space.space_type))
            .collect();
        Ok(TargetPage::last(items))
    }

    async fn index_spaces(&self) -> Result<Vec<IndexedSpace>, RemoteError> {
        self.acquire_admin_key().await?;
        debug!("Indexing spaces and their permissions");

        let mut request = self
            .request(Method::GET, "/wiki/api/v2/spaces")
            .query(&[("limit", self.page_size)]);
        let mut index = Vec::new();
        loop {
            let page: WikiPage<SpaceRecord> = decode(self.send(request).await?)?;
            for space in page.results {
                let holders = self
                    .space_permissions(&space.id)
                    .await?
                    .into_iter()
                    .filter(|p| p.principal.kind == "user")
                    .map(|p| p.principal.id)
                    .collect();
                index.push(IndexedSpace {
                    space_type: SpaceType::from_api(&space.space_type),
                    id: space.id,
                    key: space.key,
                    holders,
                });
            }
            match page.links.next {
                Some(next) => request = self.request(Method::GET, &next),
                None => break,
            }
        }
        debug!(spaces = index.len(), "Space index built");
        Ok(index)
    }

    async fn display_name_of(&self, account: &AccountId) -> Result<String, RemoteError> {
        let request = self
            .request(Method::GET, "/rest/api/3/user")
            .query(&[("accountId", account.as_str())]);
        let user: UserRecord = decode(self.send(request).await?)?;
        Ok(identity_from_record(account.to_string(), user).display_name)
    }

    async fn space_permissions(&self, space_id: &str) -> Result<Vec<SpacePermission>, RemoteError> {
        let mut request = self
            .request(
                Method::GET,
                &format!("/wiki/api/v2/spaces/{}/permissions", space_id),
            )
            .query(&[("limit", self.page_size)]);
        let mut permissions = Vec::new();
        loop {
            let page: WikiPage<SpacePermission> = decode(self.send(request).await?)?;
            permissions.extend(page.results);
            match page.links.next {
                Some(next) => request = self.request(Method::GET, &next),
                None => return Ok(permissions),
            }
        }
    }

    /// Copies every permission `previous` holds on the space to `new_owner`,
    /// then removes the original. A personal space is renamed afterwards so it
    /// no longer reads as the previous holder's.
    async fn move_space_permissions(
        &self,
        space_id: &str,
        space_key: &str,
        space_type: SpaceType,
        previous: &AccountId,
        new_owner: &AccountId,
    ) -> Result<(), RemoteError> {
        let held: Vec<SpacePermission> = self
            .space_permissions(space_id)
            .await?
            .into_iter()
            .filter(|p| p.held_by(previous))
            .collect();

        if held.is_empty() {
            debug!(space = space_key, %previous, "No permissions left to move");
        }

        for permission in held {
            let grant = self
                .request(
                    Method::POST,
                    &format!("/wiki/rest/api/space/{}/permission", space_key),
                )
                .json(&permission_grant(&permission, new_owner));
            match self.send(grant).await {
                Ok(_) => {}
                Err(e) if is_duplicate_permission(&e) => {
                    warn!(
                        space = space_key,
                        operation = %permission.operation.key,
                        "Permission already granted to new owner"
                    );
                }
                Err(e) => return Err(e),
            }

            let revoke = self.request(
                Method::DELETE,
                &format!(
                    "/wiki/rest/api/space/{}/permission/{}",
                    space_key, permission.id
                ),
            );
            self.send(revoke).await?;
        }

        if space_type == SpaceType::Personal {
            let name = self.display_name_of(new_owner).await?;
            let rename = self
                .request(Method::PUT, &format!("/wiki/rest/api/space/{}", space_key))
                .json(&space_rename(space_type, &name));
            self.send(rename).await?;
            debug!(space = space_key, "Renamed personal space");
        }
        Ok(())
    }
}

impl std::fmt::Debug for AtlassianClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlassianClient")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl OwnershipService for AtlassianClient {
    async fn resolve_identity(&self, token: &str) -> Result<ResolvedIdentity, ResolveError> {
        let request = self
            .request(Method::GET, "/rest/api/3/user/search")
            .query(&[("query", token)]);
        let users: Vec<UserRecord> = decode(self.send(request).await?)?;
        pick_user(token, users)
    }

    async fn search_owned_targets(
        &self,
        kind: TargetKind,
        owner: &AccountId,
        scope: Option<&ScopeFilter>,
        cursor: Option<&PageCursor>,
    ) -> Result<TargetPage, RemoteError> {
        match kind {
            TargetKind::Issue { field } => self.search_issues(field, owner, scope, cursor).await,
            TargetKind::Filter => self.search_filters(owner, cursor).await,
            TargetKind::Space => self.search_spaces(owner).await,
        }
    }

    async fn set_owner(
        &self,
        target: &Target,
        previous: &AccountId,
        new_owner: &AccountId,
    ) -> Result<(), RemoteError> {
        match target {
            Target::Issue { key, field } => {
                let request = self
                    .request(Method::PUT, &format!("/rest/api/3/issue/{}", key))
                    .query(&[("notifyUsers", "false")])
                    .json(&json!({
                        "fields": { field.as_api_str(): { "accountId": new_owner } }
                    }));
                self.send(request).await.map(|_| ())
            }
            Target::Filter { id } => {
                let request = self
                    .request(
                        Method::PUT,
                        &format!("/rest/api/3/filter/{}/owner", id.as_str()),
                    )
                    .json(&json!({ "accountId": new_owner }));
                self.send(request).await.map(|_| ())
            }
            Target::Space {
                id,
                key,
                space_type,
            } => {
                self.move_space_permissions(id, key.as_str(), *space_type, previous, new_owner)
                    .await
            }
        }
    }
}

// ─── Decoding ─────────────────────────────────────────────────────────────────

fn decode<T: serde::de::DeserializeOwned>(json: Value) -> Result<T, RemoteError> {
    serde_json::from_value(json).map_err(RemoteError::malformed)
}

fn identity_from_record(token: String, user: UserRecord) -> ResolvedIdentity {
    let display_name = user
        .display_name
        .or(user.email_address)
        .unwrap_or_else(|| user.account_id.clone());
    ResolvedIdentity::new(token, AccountId::new(user.account_id), display_name)
}

/// Picks the account a token refers to from directory search hits.
///
/// A single hit is taken as-is (the directory matches on prefixes of names
/// and emails). With several hits only an exact account id or email match
/// is accepted.
fn pick_user(token: &str, users: Vec<UserRecord>) -> Result<ResolvedIdentity, ResolveError> {
    let candidates = users.len();
    if candidates == 1 {
        let user = users.into_iter().next().ok_or_else(|| ResolveError::NotFound {
            token: token.to_string(),
        })?;
        return Ok(identity_from_record(token.to_string(), user));
    }
    if candidates == 0 {
        return Err(ResolveError::NotFound {
            token: token.to_string(),
        });
    }

    users
        .into_iter()
        .find(|u| {
            u.account_id == token
                || u
                    .email_address
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(token))
        })
        .map(|u| identity_from_record(token.to_string(), u))
        .ok_or_else(|| ResolveError::Ambiguous {
            token: token.to_string(),
            candidates,
        })
}

fn issue_jql(field: UserField, owner: &AccountId, scope: Option<&ScopeFilter>) -> String {
    let mut jql = format!("{} = \"{}\"", field.as_api_str(), owner);
    if let Some(ScopeFilter::Project(key)) = scope {
        jql.push_str(&format!(" AND project = \"{}\"", key));
    }
    jql.push_str(" ORDER BY key ASC");
    jql
}

fn issue_page(json: Value, field: UserField) -> Result<TargetPage, RemoteError> {
    let response: IssueSearchResponse = decode(json)?;
    Ok(TargetPage {
        items: response
            .issues
            .into_iter()
            .map(|i| Target::issue(i.key, field))
            .collect(),
        next_cursor: response
            .next_page_token
            .filter(|t| !t.is_empty())
            .map(PageCursor::new),
    })
}

fn filter_page(json: Value) -> Result<TargetPage, RemoteError> {
    let response: FilterSearchResponse = decode(json)?;
    Ok(TargetPage {
        items: response
            .values
            .into_iter()
            .map(|f| Target::filter(f.id))
            .collect(),
        next_cursor: response
            .next_page
            .filter(|n| !n.is_empty())
            .map(PageCursor::new),
    })
}

fn permission_grant(permission: &SpacePermission, new_owner: &AccountId) -> Value {
    json!({
        "subject": { "type": "user", "identifier": new_owner },
        "operation": {
            "key": permission.operation.key,
            "target": permission.operation.target_type,
        }
    })
}

fn space_rename(space_type: SpaceType, new_owner_name: &str) -> Value {
    json!({
        "type": space_type.as_api_str(),
        "name": format!("{}'s Old Personal Space", new_owner_name),
    })
}

fn is_duplicate_permission(err: &RemoteError) -> bool {
    err.kind == RemoteErrorKind::Rejected
        && (err.status_code == Some(409)
            || (err.status_code == Some(400) && err.message.contains("Permission already exists")))
}
