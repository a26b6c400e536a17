use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The relations a user can hold with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Favorite,
    Viewed,
    Liked,
}

/// Static configuration of a relation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationSpec {
    pub kind: RelationKind,
    /// Item field holding the aggregate counter, if this relation has one.
    pub counter: Option<&'static str>,
}

impl RelationKind {
    pub const ALL: [RelationKind; 3] = [
        RelationKind::Favorite,
        RelationKind::Viewed,
        RelationKind::Liked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Favorite => "favorite",
            RelationKind::Viewed => "viewed",
            RelationKind::Liked => "liked",
        }
    }

    pub fn spec(&self) -> RelationSpec {
        let counter = match self {
            RelationKind::Liked => Some("likes"),
            RelationKind::Favorite | RelationKind::Viewed => None,
        };
        RelationSpec {
            kind: *self,
            counter,
        }
    }

    pub fn has_counter(&self) -> bool {
        self.spec().counter.is_some()
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "favorite" | "fav" => Ok(RelationKind::Favorite),
            "viewed" | "seen" => Ok(RelationKind::Viewed),
            "liked" | "like" => Ok(RelationKind::Liked),
            other => Err(format!("unknown relation '{}'", other)),
        }
    }
}

/// A per-user relation record. Presence of a marker for
/// `(relation, item_id, user_id)` means the relation holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: String,
    pub relation: RelationKind,
    pub item_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Marker {
    pub fn new(relation: RelationKind, item_id: &str, user_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            relation,
            item_id: item_id.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}
