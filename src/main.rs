use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use watchlist::app::AppContext;
use watchlist::cli::{commands, Cli, Commands, StdinConfirm};
use watchlist::config::Config;
use watchlist::domain::{Identity, RelationKind};
use watchlist::reconciler::{AlwaysConfirm, Confirm};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });

    // The shell owns stdin, so it cannot prompt.
    let confirm: Arc<dyn Confirm> = if cli.yes || matches!(cli.command, Commands::Shell) {
        Arc::new(AlwaysConfirm)
    } else {
        Arc::new(StdinConfirm)
    };
    let identity = cli.user.map(|user_id| {
        let login = cli.login.unwrap_or_else(|| user_id.clone());
        Identity::new(user_id, login)
    });
    let ctx = AppContext::new(&config, cli.db, identity, confirm)?;

    match cli.command {
        Commands::Add {
            title,
            kind,
            genre,
            year,
            platform,
        } => {
            let form = Commands::new_item(title, kind, genre, year, platform);
            commands::add_item(&ctx, form).await?;
        }
        Commands::Edit {
            id,
            title,
            kind,
            genre,
            year,
            platform,
        } => {
            let patch = Commands::patch(title, kind, genre, year, platform);
            commands::edit_item(&ctx, &id, patch).await?;
        }
        Commands::List => {
            commands::list_items(&ctx).await?;
        }
        Commands::Remove { id } => {
            commands::remove_item(&ctx, &id).await?;
        }
        Commands::Fav { id } => {
            commands::toggle(&ctx, RelationKind::Favorite, &id).await?;
        }
        Commands::Viewed { id } => {
            commands::toggle(&ctx, RelationKind::Viewed, &id).await?;
        }
        Commands::Like { id } => {
            commands::toggle(&ctx, RelationKind::Liked, &id).await?;
        }
        Commands::Favorites => {
            commands::list_favorites(&ctx).await?;
        }
        Commands::Unfav { marker_id } => {
            commands::remove_favorite(&ctx, &marker_id).await?;
        }
        Commands::Shell => {
            commands::shell(&ctx).await?;
        }
        Commands::Whoami => {
            commands::whoami(&ctx)?;
        }
    }

    Ok(())
}
