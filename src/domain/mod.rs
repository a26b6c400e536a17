pub mod item;
pub mod marker;
pub mod user;

pub use item::{Genre, Item, ItemKind, ItemPatch, NewItem, Platform};
pub use marker::{Marker, RelationKind, RelationSpec};
pub use user::Identity;
