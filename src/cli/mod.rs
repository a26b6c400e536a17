pub mod commands;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::domain::{Genre, ItemKind, ItemPatch, NewItem, Platform};
use crate::reconciler::Confirm;

#[derive(Parser)]
#[command(name = "watchlist")]
#[command(about = "A shared watch-list for movies, series and documentaries", long_about = None)]
pub struct Cli {
    /// User id to act as (overrides the config file)
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Display login for --user (defaults to the user id)
    #[arg(long, global = true)]
    pub login: Option<String>,

    /// Path to the database file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Answer yes to every confirmation prompt
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a title to the list
    Add {
        /// Title words
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
        /// movie, series or documentary
        #[arg(short = 't', long = "type", default_value = "movie")]
        kind: ItemKind,
        #[arg(short, long)]
        genre: Option<Genre>,
        #[arg(long, default_value = "")]
        year: String,
        #[arg(short, long)]
        platform: Option<Platform>,
    },
    /// Edit a title you added
    Edit {
        /// Item id or unique id prefix
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short = 't', long = "type")]
        kind: Option<ItemKind>,
        #[arg(short, long)]
        genre: Option<Genre>,
        #[arg(long)]
        year: Option<String>,
        #[arg(short, long)]
        platform: Option<Platform>,
    },
    /// List all titles
    List,
    /// Delete a title you added
    Remove {
        /// Item id or unique id prefix
        id: String,
    },
    /// Toggle favorite on a title
    Fav { id: String },
    /// Toggle viewed on a title
    Viewed { id: String },
    /// Toggle your like on a title
    Like { id: String },
    /// List your favorites
    Favorites,
    /// Remove a favorite by its favorite id (see `favorites`)
    Unfav { marker_id: String },
    /// Interactive session with live updates
    Shell,
    /// Show the current user
    Whoami,
}

impl Commands {
    pub fn new_item(
        title: Vec<String>,
        kind: ItemKind,
        genre: Option<Genre>,
        year: String,
        platform: Option<Platform>,
    ) -> NewItem {
        NewItem {
            kind,
            title: title.join(" "),
            genre,
            year,
            platform,
        }
    }

    pub fn patch(
        title: Option<String>,
        kind: Option<ItemKind>,
        genre: Option<Genre>,
        year: Option<String>,
        platform: Option<Platform>,
    ) -> ItemPatch {
        ItemPatch {
            kind,
            title,
            genre,
            year,
            platform,
        }
    }
}

/// Confirmation prompt on stdin/stdout. Anything but "y"/"yes" declines.
///
/// Prompts are raised from async code, so the blocking read is moved off
/// the runtime's worker when the runtime allows it.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        blocking(|| ask(prompt, &mut io::stdin().lock(), &mut io::stdout()))
    }
}

fn ask(prompt: &str, input: &mut impl BufRead, output: &mut impl Write) -> bool {
    if write!(output, "{} [y/N] ", prompt).is_err() || output.flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Run blocking work from sync or async context. `block_in_place` is only
/// available on the multi-threaded runtime; elsewhere the work runs inline.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_ask_accepts_only_yes() {
        let cases = [("y\n", true), ("YES\n", true), ("n\n", false), ("", false)];
        for (answer, expected) in cases {
            let mut out = Vec::new();
            let confirmed = ask("Delete 'Dune'?", &mut answer.as_bytes(), &mut out);
            assert_eq!(confirmed, expected, "answer {:?}", answer);
            assert_eq!(String::from_utf8(out).unwrap(), "Delete 'Dune'? [y/N] ");
        }
    }

    #[test]
    fn test_blocking_outside_runtime() {
        assert_eq!(blocking(|| 7), 7);
    }

    #[tokio::test]
    async fn test_blocking_on_current_thread_runtime() {
        assert_eq!(blocking(|| 7), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_on_multi_thread_runtime() {
        let answer = tokio::spawn(async {
            blocking(|| ask("?", &mut "yes\n".as_bytes(), &mut io::sink()))
        })
        .await
        .unwrap();
        assert!(answer);
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add() {
        let cli = Cli::try_parse_from([
            "watchlist",
            "--user",
            "alice",
            "add",
            "The",
            "Matrix",
            "--type",
            "movie",
            "--genre",
            "science-fiction",
            "--year",
            "1999",
            "--platform",
            "max",
        ])
        .unwrap();

        assert_eq!(cli.user.as_deref(), Some("alice"));
        match cli.command {
            Commands::Add {
                title,
                kind,
                genre,
                year,
                platform,
            } => {
                let form = Commands::new_item(title, kind, genre, year, platform);
                assert_eq!(form.title, "The Matrix");
                assert_eq!(form.kind, ItemKind::Movie);
                assert_eq!(form.genre, Some(Genre::ScienceFiction));
                assert_eq!(form.platform, Some(Platform::Max));
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_unknown_platform_rejected() {
        assert!(Cli::try_parse_from(["watchlist", "add", "X", "--platform", "hulu"]).is_err());
    }
}
