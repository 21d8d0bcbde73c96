//! Remote resource kinds.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, ObjectId};

/// Resource types that the release engine reads and writes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Root organization object.
    Organization,
    /// Extraction schema.
    Schema,
    /// Webhook or serverless function.
    Hook,
    /// Template from which hooks can be instantiated.
    HookTemplate,
    /// Container of queues.
    Workspace,
    /// Document queue.
    Queue,
    /// Email inbox attached to a queue.
    Inbox,
    /// Account on the remote side; only ever referenced, never released.
    User,
}

impl ObjectKind {
    /// All kinds; released kinds come first, in release order.
    pub const ALL: [Self; 8] = [
        Self::Organization,
        Self::Schema,
        Self::Hook,
        Self::HookTemplate,
        Self::Workspace,
        Self::Queue,
        Self::Inbox,
        Self::User,
    ];

    /// Returns the collection segment used in API URLs (e.g. `hooks`).
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Organization => "organizations",
            Self::Schema => "schemas",
            Self::Hook => "hooks",
            Self::HookTemplate => "hook_templates",
            Self::Workspace => "workspaces",
            Self::Queue => "queues",
            Self::Inbox => "inboxes",
            Self::User => "users",
        }
    }

    /// Derives the kind from an object URL such as `https://api/v1/hooks/12`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownKind`] when no known collection segment precedes
    /// the trailing id.
    pub fn from_url(url: &str) -> crate::Result<Self> {
        let mut segments = url.trim_end_matches('/').rsplit('/');
        let _id = segments.next();
        segments
            .next()
            .and_then(|collection| {
                Self::ALL
                    .into_iter()
                    .find(|kind| kind.collection() == collection)
            })
            .ok_or_else(|| Error::UnknownKind {
                value: url.to_owned(),
            })
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Organization => "organization",
            Self::Schema => "schema",
            Self::Hook => "hook",
            Self::HookTemplate => "hook_template",
            Self::Workspace => "workspace",
            Self::Queue => "queue",
            Self::Inbox => "inbox",
            Self::User => "user",
        })
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s || kind.collection() == s)
            .ok_or_else(|| Error::UnknownKind {
                value: s.to_owned(),
            })
    }
}

/// Extracts the trailing numeric id from an object URL.
#[must_use]
pub fn extract_id_from_url(url: &str) -> Option<ObjectId> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|last| last.parse().ok())
}

/// Replaces the trailing id segment of `url` with `id`.
///
/// Returns `None` when the URL does not end in a numeric id.
#[must_use]
pub fn replace_id_in_url(url: &str, id: ObjectId) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let (prefix, last) = trimmed.rsplit_once('/')?;
    last.parse::<u64>().ok()?;
    Some(format!("{prefix}/{id}"))
}
