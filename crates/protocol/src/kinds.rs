//! Recognized frame kinds

use std::fmt;

/// Frame kind. Unrecognized kinds are preserved in [`FrameKind::Other`] so
/// newer pages can talk to older hosts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Inject,
    Connect,
    Message,
    Response,
    Error,
    WriteStorage,
    ReadStorage,
    BeginDownload,
    RequestToken,
    BlockRefresh,
    CopyText,
    RememberKey,
    RequestUnlock,
    OpenApp,
    StorageChanged,
    ExecuteCommand,
    UnlockWithKey,
    Other(String),
}

impl FrameKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "inject" => Self::Inject,
            "connect" => Self::Connect,
            "message" => Self::Message,
            "response" => Self::Response,
            "error" => Self::Error,
            "writeStorage" => Self::WriteStorage,
            "readStorage" => Self::ReadStorage,
            "beginDownload" => Self::BeginDownload,
            "requestToken" => Self::RequestToken,
            "blockRefresh" => Self::BlockRefresh,
            "copyText" => Self::CopyText,
            "rememberKey" => Self::RememberKey,
            "requestUnlock" => Self::RequestUnlock,
            "openApp" => Self::OpenApp,
            "storageChanged" => Self::StorageChanged,
            "executeCommand" => Self::ExecuteCommand,
            "unlockWithKey" => Self::UnlockWithKey,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Inject => "inject",
            Self::Connect => "connect",
            Self::Message => "message",
            Self::Response => "response",
            Self::Error => "error",
            Self::WriteStorage => "writeStorage",
            Self::ReadStorage => "readStorage",
            Self::BeginDownload => "beginDownload",
            Self::RequestToken => "requestToken",
            Self::BlockRefresh => "blockRefresh",
            Self::CopyText => "copyText",
            Self::RememberKey => "rememberKey",
            Self::RequestUnlock => "requestUnlock",
            Self::OpenApp => "openApp",
            Self::StorageChanged => "storageChanged",
            Self::ExecuteCommand => "executeCommand",
            Self::UnlockWithKey => "unlockWithKey",
            Self::Other(kind) => kind,
        }
    }

    /// `response` and `error` resolve pending requests instead of dispatching.
    pub fn is_correlation(&self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
