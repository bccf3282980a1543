//! OAuth token acquisition as a pure state machine.
//!
//! `transition(session, input) -> (session, effects)` holds every decision;
//! the bridge performs the effects (show a flow, ask the provider, reply to
//! the page) and feeds the outcomes back in as inputs.

use hostbridge_protocol::{
    AccessToken, ConnectionDescriptor, FlowRequest, FlowResult, FlowResultCode, TokenGrant,
};

use crate::capabilities::{Account, TokenFetch};
use crate::error::{BridgeError, CapabilityError};

const GOOGLE_DRIVE_SCOPE: &str = "oauth2:https://www.googleapis.com/auth/drive.file";
const OPENID_SCOPE: &str = "oauth2:openid";

/// Fixed token scope per provider.
pub fn scope_for_provider(provider_id: &str) -> &'static str {
    match provider_id {
        "google" => GOOGLE_DRIVE_SCOPE,
        _ => OPENID_SCOPE,
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OauthStep {
    Idle,
    ChoosingAccount,
    FetchingToken { after_consent: Option<ConsentAnswer> },
    AwaitingConsent,
    Finished,
}

/// How the user left the consent screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentAnswer {
    Granted,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OauthSession {
    pub provider_id: String,
    /// Empty until known.
    pub account_id: String,
    pub request_id: String,
    pub step: OauthStep,
}

impl OauthSession {
    pub fn new(
        provider_id: impl Into<String>,
        account_id: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            account_id: account_id.into(),
            request_id: request_id.into(),
            step: OauthStep::Idle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.step == OauthStep::Finished
    }

    fn account(&self) -> Account {
        Account {
            name: self.account_id.clone(),
            account_type: self.provider_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs and effects
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum OauthInput {
    Begin,
    FlowReturned(FlowResult),
    FlowCancelled,
    TokenFetched(Result<TokenFetch, CapabilityError>),
}

#[derive(Debug)]
pub enum OauthEffect {
    StartFlow(FlowRequest),
    FetchToken { account: Account, scope: String },
    Resolve(Result<TokenGrant, BridgeError>),
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

pub fn transition(
    mut session: OauthSession,
    input: OauthInput,
) -> (OauthSession, Vec<OauthEffect>) {
    let step = session.step.clone();
    let effects = match (step, input) {
        (OauthStep::Idle, OauthInput::Begin) => {
            if session.account_id.is_empty() {
                session.step = OauthStep::ChoosingAccount;
                vec![OauthEffect::StartFlow(FlowRequest::ChooseAccount {
                    account_types: vec![session.provider_id.clone()],
                })]
            } else {
                fetch(&mut session, None)
            }
        }

        (OauthStep::ChoosingAccount, OauthInput::FlowReturned(result)) => {
            match result.account_name() {
                Some(name) => {
                    session.account_id = name.to_string();
                    fetch(&mut session, None)
                }
                None => finish(&mut session, Err(BridgeError::FlowCancelled)),
            }
        }

        (OauthStep::ChoosingAccount | OauthStep::AwaitingConsent, OauthInput::FlowCancelled) => {
            finish(&mut session, Err(BridgeError::FlowCancelled))
        }

        (OauthStep::FetchingToken { after_consent }, OauthInput::TokenFetched(outcome)) => {
            match outcome {
                Ok(TokenFetch::Token(token)) => {
                    let grant = TokenGrant(
                        AccessToken::oauth(token),
                        ConnectionDescriptor::oauth(
                            session.provider_id.clone(),
                            session.account_id.clone(),
                        ),
                    );
                    finish(&mut session, Ok(grant))
                }
                Ok(TokenFetch::ConsentRequired(_)) if after_consent.is_some() => {
                    let err = match after_consent {
                        Some(ConsentAnswer::Dismissed) => BridgeError::FlowCancelled,
                        _ => BridgeError::ConsentExhausted,
                    };
                    finish(&mut session, Err(err))
                }
                Ok(TokenFetch::ConsentRequired(prompt)) => {
                    session.step = OauthStep::AwaitingConsent;
                    vec![OauthEffect::StartFlow(FlowRequest::Consent {
                        provider_id: session.provider_id.clone(),
                        account_name: session.account_id.clone(),
                        prompt,
                    })]
                }
                Err(err) => finish(&mut session, Err(err.into())),
            }
        }

        // Access may have been granted outside the screen, so a dismissal
        // still gets one more fetch.
        (OauthStep::AwaitingConsent, OauthInput::FlowReturned(result)) => {
            let answer = match result.result_code {
                FlowResultCode::Ok => ConsentAnswer::Granted,
                FlowResultCode::Canceled => ConsentAnswer::Dismissed,
            };
            fetch(&mut session, Some(answer))
        }

        // Stale or out-of-order input: ignore.
        _ => Vec::new(),
    };
    (session, effects)
}

fn fetch(session: &mut OauthSession, after_consent: Option<ConsentAnswer>) -> Vec<OauthEffect> {
    session.step = OauthStep::FetchingToken { after_consent };
    vec![OauthEffect::FetchToken {
        account: session.account(),
        scope: scope_for_provider(&session.provider_id).to_string(),
    }]
}

fn finish(
    session: &mut OauthSession,
    outcome: Result<TokenGrant, BridgeError>,
) -> Vec<OauthEffect> {
    session.step = OauthStep::Finished;
    vec![OauthEffect::Resolve(outcome)]
}
