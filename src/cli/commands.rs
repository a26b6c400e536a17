use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use crate::app::{AppContext, Result, WatchlistError};
use crate::cache::RelationCache;
use crate::domain::{Identity, Item, ItemPatch, NewItem, RelationKind};
use crate::identity::IdentityProvider;
use crate::reconciler::{DeleteOutcome, ToggleOutcome};

const SHORT_ID: usize = 8;

fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID).unwrap_or(id)
}

/// Find an item by full id or unique id prefix.
pub async fn resolve_item(ctx: &AppContext, id: &str) -> Result<Item> {
    let mut matches: Vec<Item> = ctx
        .reconciler
        .list_items()
        .await?
        .into_iter()
        .filter(|i| i.id.starts_with(id))
        .collect();

    match matches.len() {
        0 => Err(WatchlistError::NotFound(format!("no title with id {}", id))),
        1 => Ok(matches.remove(0)),
        n => Err(WatchlistError::ValidationFailed(format!(
            "id prefix {} matches {} titles",
            id, n
        ))),
    }
}

pub async fn add_item(ctx: &AppContext, form: NewItem) -> Result<()> {
    let user = ctx.require_user()?;
    let item = ctx.reconciler.create_item(form, &user).await?;
    println!("Added {} ({})", item.title, short_id(&item.id));
    Ok(())
}

pub async fn edit_item(ctx: &AppContext, id: &str, patch: ItemPatch) -> Result<()> {
    let user = ctx.require_user()?;
    let item = resolve_item(ctx, id).await?;
    let updated = ctx.reconciler.update_item(&item, &user, patch).await?;
    println!("Updated {} ({})", updated.title, short_id(&updated.id));
    Ok(())
}

pub async fn remove_item(ctx: &AppContext, id: &str) -> Result<()> {
    let user = ctx.require_user()?;
    let item = resolve_item(ctx, id).await?;

    match ctx.reconciler.delete_item(&item, &user).await? {
        DeleteOutcome::Deleted => println!("Removed {}", item.title),
        DeleteOutcome::Cancelled => println!("Kept {}", item.title),
    }
    Ok(())
}

pub async fn toggle(ctx: &AppContext, kind: RelationKind, id: &str) -> Result<()> {
    let user = ctx.require_user()?;
    let item = resolve_item(ctx, id).await?;

    let outcome = ctx.reconciler.toggle(kind, &item.id, &user).await?;
    let message = match (kind, outcome) {
        (_, ToggleOutcome::Cancelled) => "Nothing changed".to_string(),
        (RelationKind::Favorite, ToggleOutcome::Activated { .. }) => "Added to favorites".into(),
        (RelationKind::Favorite, ToggleOutcome::Deactivated { .. }) => {
            "Removed from favorites".into()
        }
        (RelationKind::Viewed, ToggleOutcome::Activated { .. }) => "Marked as viewed".into(),
        (RelationKind::Viewed, ToggleOutcome::Deactivated { .. }) => "Marked as not viewed".into(),
        (RelationKind::Liked, ToggleOutcome::Activated { count }) => {
            format!("Liked ({} likes)", count.unwrap_or(0))
        }
        (RelationKind::Liked, ToggleOutcome::Deactivated { count }) => {
            format!("Like removed ({} likes)", count.unwrap_or(0))
        }
    };
    println!("{}: {}", item.title, message);
    Ok(())
}

/// Refresh every relation kind of `user` into the cache.
async fn load_relations(ctx: &AppContext, user: &Identity) -> Result<()> {
    for kind in RelationKind::ALL {
        ctx.cache
            .refresh(ctx.remote.as_ref(), kind, &user.user_id)
            .await?;
    }
    Ok(())
}

fn render_item(item: &Item, cache: &RelationCache, signed_in: bool) -> String {
    let flag = |kind: RelationKind, mark: char| {
        if signed_in && cache.get(kind, &item.id).active {
            mark
        } else {
            '.'
        }
    };

    format!(
        "{} [{}{}{}] {:>3}  {:<11} {} ({})  {}  {}  added by {}",
        short_id(&item.id),
        flag(RelationKind::Favorite, '*'),
        flag(RelationKind::Viewed, 'v'),
        flag(RelationKind::Liked, '+'),
        item.likes,
        item.kind.label(),
        item.title,
        item.display_year(),
        item.genre.map(|g| g.label()).unwrap_or("-"),
        item.platform.map(|p| p.label()).unwrap_or("-"),
        item.added_by,
    )
}

pub async fn list_items(ctx: &AppContext) -> Result<()> {
    let items = ctx.reconciler.list_items().await?;

    if items.is_empty() {
        println!("No titles yet");
        return Ok(());
    }

    let user = ctx.session.current();
    if let Some(ref user) = user {
        load_relations(ctx, user).await?;
    }

    for item in &items {
        println!("{}", render_item(item, &ctx.cache, user.is_some()));
    }
    Ok(())
}

pub async fn list_favorites(ctx: &AppContext) -> Result<()> {
    let user = ctx.require_user()?;
    let favorites = ctx.reconciler.favorites(&user).await?;

    if favorites.is_empty() {
        println!("You have no favorites");
        return Ok(());
    }

    for entry in favorites {
        println!(
            "{}  {} ({})  {}  {}",
            short_id(&entry.marker_id),
            entry.item.title,
            entry.item.display_year(),
            entry.item.genre.map(|g| g.label()).unwrap_or("-"),
            entry.item.platform.map(|p| p.label()).unwrap_or("-"),
        );
    }
    Ok(())
}

pub async fn remove_favorite(ctx: &AppContext, marker_id: &str) -> Result<()> {
    let user = ctx.require_user()?;
    let mut matches: Vec<_> = ctx
        .reconciler
        .favorites(&user)
        .await?
        .into_iter()
        .filter(|e| e.marker_id.starts_with(marker_id))
        .collect();

    let entry = match matches.len() {
        0 => {
            return Err(WatchlistError::NotFound(format!(
                "no favorite with id {}",
                marker_id
            )))
        }
        1 => matches.remove(0),
        n => {
            return Err(WatchlistError::ValidationFailed(format!(
                "id prefix {} matches {} favorites",
                marker_id, n
            )))
        }
    };

    ctx.reconciler
        .remove_favorite(&entry.marker_id, &user)
        .await?;
    println!("Removed {} from favorites", entry.item.title);
    Ok(())
}

pub fn whoami(ctx: &AppContext) -> Result<()> {
    match ctx.session.current() {
        Some(user) => println!("{} ({})", user.login, user.user_id),
        None => println!("Not signed in"),
    }
    Ok(())
}

const SHELL_HELP: &str = "\
commands:
  list                  all titles
  favorites             your favorites
  fav|viewed|like <id>  toggle a relation
  rm <id>               delete a title you added
  unfav <favorite-id>   remove a favorite
  login <user> [login]  switch user
  logout                sign out
  whoami                current user
  quit                  leave";

/// Aborts its tasks when dropped, whichever way the owner returns.
struct AbortOnDrop(Vec<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// Interactive session. Relation counts are re-rendered whenever the live
/// subscriptions refresh the cache.
pub async fn shell(ctx: &AppContext) -> Result<()> {
    run_shell(ctx, BufReader::new(tokio::io::stdin())).await
}

async fn run_shell<R: AsyncBufRead + Unpin>(ctx: &AppContext, input: R) -> Result<()> {
    let mut manager = ctx.subscriptions(&RelationKind::ALL);
    let identity = ctx.session.watch();
    // Aborting the follower drops the manager, which releases its subscriptions.
    let _tasks = AbortOnDrop(vec![
        tokio::spawn(async move { manager.follow(identity).await }),
        tokio::spawn(render_live(ctx.cache.clone())),
    ]);

    println!("{}", SHELL_HELP);
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            [] => Ok(()),
            ["quit"] | ["exit"] => break,
            ["help"] => {
                println!("{}", SHELL_HELP);
                Ok(())
            }
            ["list"] => list_items(ctx).await,
            ["favorites"] => list_favorites(ctx).await,
            ["fav", id] => toggle(ctx, RelationKind::Favorite, id).await,
            ["viewed", id] => toggle(ctx, RelationKind::Viewed, id).await,
            ["like", id] => toggle(ctx, RelationKind::Liked, id).await,
            ["rm", id] => remove_item(ctx, id).await,
            ["unfav", id] => remove_favorite(ctx, id).await,
            ["login", user_id] => {
                ctx.session.sign_in(Identity::new(*user_id, *user_id));
                Ok(())
            }
            ["login", user_id, login] => {
                ctx.session.sign_in(Identity::new(*user_id, *login));
                Ok(())
            }
            ["logout"] => {
                ctx.session.sign_out();
                Ok(())
            }
            ["whoami"] => whoami(ctx),
            _ => {
                println!("unknown command, try 'help'");
                Ok(())
            }
        };

        if let Err(e) = result {
            eprintln!("  ! {}", e);
        }
    }

    Ok(())
}

async fn render_live(cache: Arc<RelationCache>) {
    let mut changes = cache.changes();
    let mut last = None;
    while changes.changed().await.is_ok() {
        let summary = (
            cache.active_items(RelationKind::Favorite).len(),
            cache.active_items(RelationKind::Viewed).len(),
            cache.active_items(RelationKind::Liked).len(),
        );
        if last != Some(summary) {
            println!(
                "  [live] {} favorites, {} viewed, {} liked",
                summary.0, summary.1, summary.2
            );
            last = Some(summary);
        }
    }
}
