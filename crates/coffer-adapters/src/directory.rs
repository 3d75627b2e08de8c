use async_trait::async_trait;
use coffer_core::{DirectoryError, Identity, IdentityDirectory, IdentityProfile};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct PersonRecord {
    #[serde(default)]
    owner_alias: String,
    #[serde(default)]
    img: Option<String>,
}

/// Platform people service client. `GET {base}/person/{pubkey}`; a 404 means
/// the identity is unknown.
#[derive(Clone)]
pub struct HttpIdentityDirectory {
    client: reqwest::Client,
    base_url: reqwest::Url,
    timeout: Duration,
}

impl HttpIdentityDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DirectoryError> {
        let base_url = base_url.into();
        let base_url = reqwest::Url::parse(&base_url)
            .map_err(|e| DirectoryError::Transport(format!("invalid directory url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::Transport(format!(
                "directory url {base_url} cannot carry a path"
            )));
        }
        let client = crate::build_http_client(timeout).map_err(DirectoryError::Transport)?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// `{base}/person/{pubkey}` with the pubkey escaped as a single segment.
    fn person_url(&self, identity: &Identity) -> Result<reqwest::Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                DirectoryError::Transport(format!("directory url {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .push("person")
            .push(identity.as_str());
        Ok(url)
    }
}

#[async_trait]
impl IdentityDirectory for HttpIdentityDirectory {
    async fn lookup_identity(
        &self,
        identity: &Identity,
    ) -> Result<Option<IdentityProfile>, DirectoryError> {
        let url = self.person_url(identity)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DirectoryError::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
                } else {
                    DirectoryError::Transport(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DirectoryError::Transport(format!(
                "directory returned {}",
                response.status()
            )));
        }

        let person: PersonRecord = response
            .json()
            .await
            .map_err(|e| DirectoryError::Transport(format!("invalid person response: {e}")))?;
        Ok(Some(IdentityProfile {
            identity: identity.clone(),
            display_name: person.owner_alias,
            avatar_url: person.img.filter(|img| !img.is_empty()),
        }))
    }
}

/// Directory backed by an in-process map. Unknown identities resolve to `None`.
#[derive(Default)]
pub struct StaticIdentityDirectory {
    profiles: RwLock<HashMap<Identity, IdentityProfile>>,
}

impl StaticIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: &str, display_name: &str, avatar_url: Option<&str>) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert(
                Identity::new(identity),
                IdentityProfile {
                    identity: Identity::new(identity),
                    display_name: display_name.to_string(),
                    avatar_url: avatar_url.map(str::to_string),
                },
            );
        }
    }
}

#[async_trait]
impl IdentityDirectory for StaticIdentityDirectory {
    async fn lookup_identity(
        &self,
        identity: &Identity,
    ) -> Result<Option<IdentityProfile>, DirectoryError> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| DirectoryError::Transport("profiles lock poisoned".to_string()))?;
        Ok(profiles.get(identity).cloned())
    }
}
