//! Account token provider backed by an HTTP endpoint.
//!
//! The endpoint receives `{account_name, account_type, scope}` and answers
//! either `{"access_token": "..."}` or `{"consent": <prompt>}` when an
//! interactive step is needed first.

use futures::FutureExt;
use hostbridge_core::{Account, AccountTokenProvider, CapabilityError, CapabilityFuture, TokenFetch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct TokenQuery<'a> {
    account_name: &'a str,
    account_type: &'a str,
    scope: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenReply {
    Token { access_token: String },
    Consent { consent: Value },
}

impl From<TokenReply> for TokenFetch {
    fn from(reply: TokenReply) -> Self {
        match reply {
            TokenReply::Token { access_token } => TokenFetch::Token(access_token),
            TokenReply::Consent { consent } => TokenFetch::ConsentRequired(consent),
        }
    }
}

pub struct HttpTokenProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTokenProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

fn request_failed(err: reqwest::Error) -> CapabilityError {
    CapabilityError::Failed(format!("token endpoint: {err}"))
}

impl AccountTokenProvider for HttpTokenProvider {
    fn fetch_token(&self, account: Account, scope: String) -> CapabilityFuture<TokenFetch> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        async move {
            let query = TokenQuery {
                account_name: &account.name,
                account_type: &account.account_type,
                scope: &scope,
            };
            let response = client
                .post(&endpoint)
                .json(&query)
                .send()
                .await
                .map_err(request_failed)?;

            let status = response.status();
            if !status.is_success() {
                warn!(
                    component = "token_provider",
                    event = "token_provider.http_error",
                    status = status.as_u16(),
                    account_type = %account.account_type,
                    "Token endpoint rejected request"
                );
                return Err(CapabilityError::Failed(format!(
                    "token endpoint returned {status}"
                )));
            }

            let reply: TokenReply = response.json().await.map_err(request_failed)?;
            let fetch = TokenFetch::from(reply);
            debug!(
                component = "token_provider",
                event = "token_provider.fetched",
                consent_required = matches!(fetch, TokenFetch::ConsentRequired(_)),
                "Token endpoint answered"
            );
            Ok(fetch)
        }
        .boxed()
    }
}
