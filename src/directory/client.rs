//! Sources of remote account data.

use super::types::{DirectoryError, DirectorySnapshot, RemoteGroup, RemoteUser, Uid};
use crate::config::DirectoryConfig;
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read access to the remote account service.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Fetch every active user record.
    async fn fetch_users(&self) -> Result<Vec<RemoteUser>, DirectoryError>;

    /// Fetch every group record. `force_refresh` bypasses server-side caching.
    async fn fetch_groups(&self, force_refresh: bool) -> Result<Vec<RemoteGroup>, DirectoryError>;

    /// Fetch users and groups into one immutable snapshot.
    async fn snapshot(&self, force_refresh: bool) -> Result<DirectorySnapshot, DirectoryError> {
        let users = self.fetch_users().await?;
        let groups = self.fetch_groups(force_refresh).await?;
        debug!(users = users.len(), groups = groups.len(), "Fetched directory snapshot");
        Ok(DirectorySnapshot::new(users, groups))
    }
}

/// How the HTTP client authenticates.
#[derive(Debug, Clone)]
pub enum Credentials {
    Basic { login: String, password: String },
    Token(String),
    Anonymous,
}

const USER_DATA_ENDPOINT: &str = "json/fas_client/user_data";
const GROUP_DATA_ENDPOINT: &str = "json/fas_client/group_data";

/// User record as the server encodes it, keyed by the uid string.
#[derive(Debug, Deserialize)]
struct WireUser {
    username: String,
    #[serde(default)]
    human_name: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    ssh_key: Option<String>,
    #[serde(default)]
    status: Option<super::types::AccountStatus>,
}

/// Group record as the server encodes it, keyed by group name.
#[derive(Debug, Deserialize)]
struct WireGroup {
    id: u32,
    #[serde(rename = "type", default)]
    group_type: String,
    #[serde(default)]
    administrators: Vec<WireUid>,
    #[serde(default)]
    sponsors: Vec<WireUid>,
    #[serde(default)]
    users: Vec<WireUid>,
}

/// Member uids arrive as integers from some servers and strings from others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireUid {
    Number(Uid),
    Text(String),
}

impl WireUid {
    fn parse(&self) -> Option<Uid> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserDataResponse {
    people: BTreeMap<String, WireUser>,
}

#[derive(Debug, Deserialize)]
struct GroupDataResponse {
    groups: BTreeMap<String, WireGroup>,
}

fn uid_set(uids: &[WireUid], group: &str) -> BTreeSet<Uid> {
    uids.iter()
        .filter_map(|raw| {
            let parsed = raw.parse();
            if parsed.is_none() {
                warn!(group, "Ignoring malformed member uid {:?}", raw);
            }
            parsed
        })
        .collect()
}

fn users_from_wire(people: BTreeMap<String, WireUser>) -> Vec<RemoteUser> {
    people
        .into_iter()
        .filter_map(|(key, wire)| match key.parse::<Uid>() {
            Ok(id) => Some(RemoteUser {
                id,
                username: wire.username,
                human_name: wire.human_name.unwrap_or_default(),
                password: wire.password.unwrap_or_default(),
                ssh_key: wire.ssh_key.filter(|k| !k.trim().is_empty()),
                status: wire.status.unwrap_or_default(),
            }),
            Err(_) => {
                warn!("Ignoring user record with non-numeric uid '{}'", key);
                None
            }
        })
        .collect()
}

fn groups_from_wire(groups: BTreeMap<String, WireGroup>) -> Vec<RemoteGroup> {
    groups
        .into_iter()
        .map(|(name, wire)| RemoteGroup {
            id: wire.id,
            administrators: uid_set(&wire.administrators, &name),
            sponsors: uid_set(&wire.sponsors, &name),
            users: uid_set(&wire.users, &name),
            group_type: wire.group_type,
            name,
        })
        .collect()
}

/// Account service reached over HTTPS with one authenticated client.
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

impl HttpDirectory {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, DirectoryError> {
        // A trailing slash keeps Url::join from dropping the last path segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url =
            Url::parse(&normalized).map_err(|_| DirectoryError::InvalidUrl(base_url.to_string()))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("acctsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DirectoryError> {
        self.base_url
            .join(path)
            .map_err(|_| DirectoryError::InvalidUrl(format!("{}{path}", self.base_url)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, DirectoryError> {
        let url = self.endpoint(path)?;
        let mut request = self.client.get(url).query(query);
        request = match &self.credentials {
            Credentials::Basic { login, password } => request.basic_auth(login, Some(password)),
            Credentials::Token(token) => request.bearer_auth(token),
            Credentials::Anonymous => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl AccountDirectory for HttpDirectory {
    async fn fetch_users(&self) -> Result<Vec<RemoteUser>, DirectoryError> {
        let body: UserDataResponse = self.get_json(USER_DATA_ENDPOINT, &[]).await?;
        Ok(users_from_wire(body.people))
    }

    async fn fetch_groups(&self, force_refresh: bool) -> Result<Vec<RemoteGroup>, DirectoryError> {
        let refresh = if force_refresh { "1" } else { "0" };
        let body: GroupDataResponse = self
            .get_json(GROUP_DATA_ENDPOINT, &[("force_refresh", refresh)])
            .await?;
        Ok(groups_from_wire(body.groups))
    }
}

/// On-disk snapshot file holding `users` and `groups` arrays.
#[derive(Debug, Default, Deserialize, serde::Serialize)]
pub struct SnapshotDocument {
    #[serde(default)]
    pub users: Vec<RemoteUser>,
    #[serde(default)]
    pub groups: Vec<RemoteGroup>,
}

/// Directory backed by a JSON snapshot file, for offline runs.
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read(&self) -> Result<SnapshotDocument, DirectoryError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl AccountDirectory for SnapshotFile {
    async fn fetch_users(&self) -> Result<Vec<RemoteUser>, DirectoryError> {
        Ok(self.read().await?.users)
    }

    async fn fetch_groups(&self, _force_refresh: bool) -> Result<Vec<RemoteGroup>, DirectoryError> {
        Ok(self.read().await?.groups)
    }
}

impl Credentials {
    /// Token when set, basic auth when a login is set, anonymous otherwise.
    #[must_use]
    pub fn from_config(config: &DirectoryConfig) -> Self {
        match config.token.as_deref() {
            Some(token) if !token.is_empty() => Credentials::Token(token.to_string()),
            _ if !config.login.is_empty() => Credentials::Basic {
                login: config.login.clone(),
                password: config.password.clone(),
            },
            _ => Credentials::Anonymous,
        }
    }
}

/// The directory a configuration points at: the snapshot file when one is
/// set, the HTTP service otherwise.
pub fn directory_from_config(
    config: &DirectoryConfig,
) -> Result<Arc<dyn AccountDirectory>, DirectoryError> {
    match &config.snapshot {
        Some(path) if !path.as_os_str().is_empty() => Ok(Arc::new(SnapshotFile::new(path.clone()))),
        _ => Ok(Arc::new(HttpDirectory::new(
            &config.url,
            Credentials::from_config(config),
        )?)),
    }
}
