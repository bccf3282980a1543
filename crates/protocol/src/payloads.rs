//! JSON payloads carried inside frames

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `readStorage` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadStorage {
    pub key: String,
}

/// `writeStorage` request. A JSON `null` value deletes the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteStorage {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// `storageChanged` notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChanged {
    pub key: String,
}

/// `beginDownload` request. `data` is base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginDownload {
    pub filename: String,
    pub content_type: String,
    pub data: String,
}

/// `requestToken` request, discriminated by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "lowercase")]
pub enum TokenRequest {
    None,
    #[serde(rename_all = "camelCase")]
    Oauth {
        server_id: String,
        #[serde(default)]
        user_id: String,
    },
}

/// Token half of a successful `requestToken` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub id: String,
    pub access_token: String,
}

impl AccessToken {
    pub fn oauth(access_token: impl Into<String>) -> Self {
        Self {
            id: "oauth".to_string(),
            access_token: access_token.into(),
        }
    }
}

/// Connection half of a successful `requestToken` response: which provider
/// and identity the token belongs to, so the page can ask again silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub id: String,
    pub server_id: String,
    pub user_id: String,
}

impl ConnectionDescriptor {
    pub fn oauth(server_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: "oauth".to_string(),
            server_id: server_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// `requestToken` result, serialized as the two-element array
/// `[token, connectionDescriptor]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant(pub AccessToken, pub ConnectionDescriptor);

impl TokenGrant {
    pub fn token(&self) -> &AccessToken {
        &self.0
    }

    pub fn connection(&self) -> &ConnectionDescriptor {
        &self.1
    }
}
