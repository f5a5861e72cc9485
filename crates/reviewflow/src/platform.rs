use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Baemin,
    CoupangEats,
    Yogiyo,
    Ddangyo,
    Naver,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Baemin,
        Platform::CoupangEats,
        Platform::Yogiyo,
        Platform::Ddangyo,
        Platform::Naver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Baemin => "baemin",
            Platform::CoupangEats => "coupang_eats",
            Platform::Yogiyo => "yogiyo",
            Platform::Ddangyo => "ddangyo",
            Platform::Naver => "naver",
        }
    }

    /// Accepts the canonical code plus the `danggeoyo` spelling used by
    /// older dashboard routes.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "baemin" => Some(Platform::Baemin),
            "coupang_eats" => Some(Platform::CoupangEats),
            "yogiyo" => Some(Platform::Yogiyo),
            "ddangyo" | "danggeoyo" => Some(Platform::Ddangyo),
            "naver" => Some(Platform::Naver),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Link,
    Sync,
    RegisterReply,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Link => "link",
            Operation::Sync => "sync",
            Operation::RegisterReply => "register_reply",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown job type: {0}")]
pub struct UnknownJobType(pub String);

/// A job type such as `baemin_sync`: one platform, one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobKind {
    pub platform: Platform,
    pub operation: Operation,
}

impl JobKind {
    pub fn new(platform: Platform, operation: Operation) -> Self {
        Self {
            platform,
            operation,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        for operation in [Operation::RegisterReply, Operation::Link, Operation::Sync] {
            let suffix = format!("_{}", operation.as_str());
            if let Some(prefix) = s.strip_suffix(suffix.as_str()) {
                return Platform::parse(prefix).map(|platform| Self::new(platform, operation));
            }
        }
        None
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.platform, self.operation)
    }
}

impl TryFrom<String> for JobKind {
    type Error = UnknownJobType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobKind::parse(&value).ok_or(UnknownJobType(value))
    }
}

impl From<JobKind> for String {
    fn from(kind: JobKind) -> Self {
        kind.to_string()
    }
}
