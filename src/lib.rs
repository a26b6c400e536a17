//! # Watchlist
//!
//! A shared watch-list: a group of users adds movies, series and
//! documentaries, and each user can favorite them, mark them viewed and
//! like them.
//!
//! ## Architecture
//!
//! ```text
//! command → ToggleReconciler → RemoteCollection → change feed
//!                                                     ↓
//!                  render ← RelationCache ← SubscriptionManager
//! ```
//!
//! - [`remote`]: remote collection store client (in-memory and SQLite)
//! - [`cache`]: derived per-user relation state
//! - [`reconciler`]: create-or-delete toggles of per-user markers
//! - [`subscription`]: live updates for a mounted view
//!
//! ## Quick Start
//!
//! ```bash
//! # Add a title
//! watchlist --user alice add Dune --year 2021 --genre science-fiction --platform max
//!
//! # List titles with your favorite/viewed/like marks
//! watchlist --user alice list
//!
//! # Like it as someone else
//! watchlist --user bob like 1a2b3c4d
//!
//! # Interactive session with live updates
//! watchlist --user bob shell
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the remote
/// store, the relation cache, the reconciler and the session.
pub mod app;

/// Per-user relation cache.
pub mod cache;

/// Command-line interface using clap.
///
/// - `add <title..>` / `edit <id>` / `remove <id>` - manage titles
/// - `list` - list titles with your marks
/// - `fav|viewed|like <id>` - toggle a relation
/// - `favorites` / `unfav <id>` - your favorites
/// - `shell` - interactive session
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/watchlist/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Item`](domain::Item): a title on the list, with its like counter
/// - [`Marker`](domain::Marker): a per-user favorite/viewed/liked record
/// - [`Identity`](domain::Identity): the signed-in user
pub mod domain;

/// Current user and sign-in changes.
pub mod identity;

/// Toggle reconciliation and item lifecycle.
///
/// - [`ToggleReconciler`](reconciler::ToggleReconciler): generic over relation kinds
/// - [`Confirm`](reconciler::Confirm): confirmation prompts for removals
pub mod reconciler;

/// Remote collection store.
///
/// - [`RemoteCollection`](remote::RemoteCollection): async trait for the store
/// - [`MemoryRemote`](remote::MemoryRemote): volatile in-process store
/// - [`SqliteRemote`](remote::SqliteRemote): SQLite-backed local store
pub mod remote;

/// Live-update subscriptions.
pub mod subscription;
