use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::{Result, WatchlistError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Movie,
    Series,
    Documentary,
}

impl ItemKind {
    pub const ALL: [ItemKind; 3] = [ItemKind::Movie, ItemKind::Series, ItemKind::Documentary];

    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Movie => "movie",
            ItemKind::Series => "series",
            ItemKind::Documentary => "documentary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Genre {
    Action,
    Adventure,
    Disaster,
    #[serde(rename = "Science Fiction")]
    ScienceFiction,
    Comedy,
    Drama,
    Fantasy,
    Musical,
    Thriller,
    Horror,
    Crime,
}

impl Genre {
    pub const ALL: [Genre; 11] = [
        Genre::Action,
        Genre::Adventure,
        Genre::Disaster,
        Genre::ScienceFiction,
        Genre::Comedy,
        Genre::Drama,
        Genre::Fantasy,
        Genre::Musical,
        Genre::Thriller,
        Genre::Horror,
        Genre::Crime,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Genre::Action => "Action",
            Genre::Adventure => "Adventure",
            Genre::Disaster => "Disaster",
            Genre::ScienceFiction => "Science Fiction",
            Genre::Comedy => "Comedy",
            Genre::Drama => "Drama",
            Genre::Fantasy => "Fantasy",
            Genre::Musical => "Musical",
            Genre::Thriller => "Thriller",
            Genre::Horror => "Horror",
            Genre::Crime => "Crime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Netflix,
    #[serde(rename = "Amazon Prime")]
    AmazonPrime,
    #[serde(rename = "Disney+")]
    DisneyPlus,
    Max,
    #[serde(rename = "AppleTV+")]
    AppleTvPlus,
    SkyShowtime,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Netflix,
        Platform::AmazonPrime,
        Platform::DisneyPlus,
        Platform::Max,
        Platform::AppleTvPlus,
        Platform::SkyShowtime,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Platform::Netflix => "Netflix",
            Platform::AmazonPrime => "Amazon Prime",
            Platform::DisneyPlus => "Disney+",
            Platform::Max => "Max",
            Platform::AppleTvPlus => "AppleTV+",
            Platform::SkyShowtime => "SkyShowtime",
        }
    }
}

/// Match a user-typed value against a fixed set of labels.
///
/// Case, spaces, dashes and underscores are ignored, so "science-fiction",
/// "Science Fiction" and "sciencefiction" all resolve to the same genre.
fn parse_label<T: Copy>(input: &str, all: &[T], label: fn(&T) -> &'static str) -> Option<T> {
    let normalize = |s: &str| {
        s.chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect::<String>()
    };
    let wanted = normalize(input);
    all.iter().copied().find(|v| normalize(label(v)) == wanted)
}

macro_rules! label_enum_impls {
    ($ty:ty, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                parse_label(s, &<$ty>::ALL, <$ty>::label).ok_or_else(|| {
                    let options: Vec<_> = <$ty>::ALL.iter().map(|v| v.label()).collect();
                    format!("unknown {} '{}', expected one of: {}", $what, s, options.join(", "))
                })
            }
        }
    };
}

label_enum_impls!(ItemKind, "type");
label_enum_impls!(Genre, "genre");
label_enum_impls!(Platform, "platform");

/// A title on the shared watch-list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    pub genre: Option<Genre>,
    #[serde(default)]
    pub year: String,
    pub platform: Option<Platform>,
    /// User id of the creator. Only the owner may delete or edit the item.
    pub owner: String,
    /// Login of the creator, for display.
    #[serde(default)]
    pub added_by: String,
    #[serde(default)]
    pub likes: u64,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner == user_id
    }

    pub fn display_year(&self) -> &str {
        if self.year.is_empty() {
            "----"
        } else {
            &self.year
        }
    }
}

/// Form input for a new title.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub kind: ItemKind,
    pub title: String,
    pub genre: Option<Genre>,
    pub year: String,
    pub platform: Option<Platform>,
}

impl NewItem {
    pub fn new(kind: ItemKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            genre: None,
            year: String::new(),
            platform: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_year(&self.year)
    }

    /// Turn validated form input into a new item owned by `owner`.
    pub fn into_item(self, owner: &str, login: &str) -> Result<Item> {
        self.validate()?;
        Ok(Item {
            id: Uuid::new_v4().to_string(),
            kind: self.kind,
            title: self.title.trim().to_string(),
            genre: self.genre,
            year: self.year.trim().to_string(),
            platform: self.platform,
            owner: owner.to_string(),
            added_by: login.to_string(),
            likes: 0,
            created_at: Utc::now(),
        })
    }
}

/// Owner edit of an item's descriptive attributes. The like counter is not
/// editable here.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub kind: Option<ItemKind>,
    pub title: Option<String>,
    pub genre: Option<Genre>,
    pub year: Option<String>,
    pub platform: Option<Platform>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.title.is_none()
            && self.genre.is_none()
            && self.year.is_none()
            && self.platform.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ref title) = self.title {
            validate_title(title)?;
        }
        if let Some(ref year) = self.year {
            validate_year(year)?;
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(WatchlistError::ValidationFailed("title is required".into()));
    }
    Ok(())
}

fn validate_year(year: &str) -> Result<()> {
    let year = year.trim();
    if year.is_empty() || (year.len() == 4 && year.chars().all(|c| c.is_ascii_digit())) {
        Ok(())
    } else {
        Err(WatchlistError::ValidationFailed(format!(
            "year must be four digits, got '{}'",
            year
        )))
    }
}
