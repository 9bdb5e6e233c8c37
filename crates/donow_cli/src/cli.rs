//! Command definitions and dispatch.
//!
//! Every command prints its result as pretty JSON on stdout.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use donow_core::db::open_db;
use donow_core::enrich::http::parse_suggested_date_time;
use donow_core::{
    init_logging, CoreConfig, CreateItemRequest, ItemId, ItemListQuery, ItemService, ItemStatus,
    ItemType, Priority, SqliteItemRepository, StatsService, SubItemDepth,
};
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use std::path::PathBuf;

/// DoNow - tasks, events, projects and notes from the terminal.
#[derive(Parser)]
#[command(name = "donow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file. Falls back to `DONOW_*` variables.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file, overriding the configured path. Required when
    /// neither `DONOW_DB_PATH` nor `database.path` is set.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Acting user id stamped on created items and status changes.
    #[arg(short, long, default_value = "local", global = true)]
    pub user: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an item.
    Add(AddArgs),
    /// Create an item from free text using AI enrichment.
    Enrich {
        text: String,
        #[arg(short = 't', long = "type", default_value = "task", value_parser = parse_type)]
        kind: ItemType,
    },
    /// List items, newest first.
    List(ListArgs),
    /// Show one item with its sub-items.
    Show {
        id: ItemId,
        #[command(flatten)]
        depth: DepthArgs,
    },
    /// Show an item's ancestor chain and full subtree.
    Tree { id: ItemId },
    /// Set an item's status.
    Status {
        id: ItemId,
        #[arg(value_parser = parse_status)]
        status: ItemStatus,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Mark an item completed.
    Done { id: ItemId },
    /// Reopen an item as Todo.
    Undone { id: ItemId },
    /// Print an item's status history, oldest first.
    History { id: ItemId },
    /// Move an item under a new parent, or to top level without `--parent`.
    Move {
        id: ItemId,
        #[arg(long)]
        parent: Option<ItemId>,
    },
    /// Delete an item and all of its sub-items.
    Delete { id: ItemId },
    /// Print statistics for the acting user.
    Stats,
}

#[derive(Args)]
pub struct AddArgs {
    pub title: String,
    #[arg(short = 't', long = "type", default_value = "task", value_parser = parse_type)]
    pub kind: ItemType,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(short, long, value_parser = parse_priority)]
    pub priority: Option<Priority>,
    #[arg(long)]
    pub category: Option<String>,
    /// `YYYY-MM-DD HH:MM:SS` (UTC), RFC 3339, or `YYYY-MM-DD`.
    #[arg(long, value_parser = parse_time)]
    pub due: Option<i64>,
    #[arg(long, value_parser = parse_time)]
    pub at: Option<i64>,
    #[arg(long, value_parser = parse_time)]
    pub remind: Option<i64>,
    /// Create as a sub-item of this parent.
    #[arg(long)]
    pub parent: Option<ItemId>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(short = 't', long = "type", value_parser = parse_type)]
    pub kind: Option<ItemType>,
    #[arg(short, long, value_parser = parse_status)]
    pub status: Option<ItemStatus>,
    #[arg(long)]
    pub tag: Option<String>,
    /// Only the caller's own items.
    #[arg(long)]
    pub mine: bool,
    #[arg(long)]
    pub top_level: bool,
    #[arg(long)]
    pub limit: Option<u32>,
    #[arg(long, default_value_t = 0)]
    pub offset: u32,
    #[command(flatten)]
    pub depth: DepthArgs,
}

#[derive(Args)]
pub struct DepthArgs {
    /// Sub-item levels to load.
    #[arg(long, conflicts_with = "full")]
    pub depth: Option<u32>,
    /// Load the whole subtree.
    #[arg(long)]
    pub full: bool,
}

impl DepthArgs {
    fn resolve(&self, default: SubItemDepth) -> SubItemDepth {
        match (self.full, self.depth) {
            (true, _) => SubItemDepth::Full,
            (false, Some(0)) => SubItemDepth::Flat,
            (false, Some(levels)) => SubItemDepth::Levels(levels),
            (false, None) => default,
        }
    }
}

#[derive(Serialize)]
struct TreeView {
    ancestors: Vec<ItemId>,
    item: donow_core::Item,
}

#[derive(Serialize)]
struct DeleteView {
    deleted: Vec<ItemId>,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let mut config = match self.config.as_ref() {
            Some(path) => CoreConfig::from_file(path)
                .with_context(|| format!("failed to load config `{}`", path.display()))?,
            None => CoreConfig::from_env()?,
        };
        if let Some(db) = self.db.clone() {
            config.database.path = Some(db);
        }
        if config.logging.dir.is_some() {
            init_logging(&config.logging)?;
        }

        let conn = open_connection(&config)?;
        let service = ItemService::new(SqliteItemRepository::try_new(&conn)?);
        let user = self.user.as_str();

        match self.command {
            Commands::Add(args) => {
                let request = CreateItemRequest {
                    title: args.title,
                    description: args.description,
                    kind: args.kind,
                    priority: args.priority,
                    category: args.category,
                    due_date: args.due,
                    event_time: args.at,
                    reminder_time: args.remind,
                    parent_id: args.parent,
                    tags: args.tags,
                    original_input: None,
                };
                print_json(&service.create(user, &request)?)
            }
            Commands::Enrich { text, kind } => {
                let enricher = config.enrichment.build_enricher()?;
                let item = service
                    .create_from_text(user, &text, kind, &enricher)
                    .await?;
                print_json(&item)
            }
            Commands::List(args) => {
                let query = ItemListQuery {
                    kind: args.kind,
                    status: args.status,
                    owner_id: args.mine.then(|| self.user.clone()),
                    tag: args.tag,
                    top_level_only: args.top_level,
                    limit: args.limit,
                    offset: args.offset,
                };
                print_json(&service.get_all(&query, args.depth.resolve(SubItemDepth::Flat))?)
            }
            Commands::Show { id, depth } => {
                print_json(&service.get(id, depth.resolve(SubItemDepth::Levels(1)))?)
            }
            Commands::Tree { id } => print_json(&TreeView {
                ancestors: service.get_ancestors(id)?,
                item: service.get(id, SubItemDepth::Full)?,
            }),
            Commands::Status {
                id,
                status,
                comment,
            } => print_json(&service.change_status(user, id, status, comment)?),
            Commands::Done { id } => print_json(&service.mark_completed(user, id)?),
            Commands::Undone { id } => print_json(&service.mark_not_completed(user, id)?),
            Commands::History { id } => print_json(&service.get_status_history(id)?),
            Commands::Move { id, parent } => print_json(&service.move_item(user, id, parent)?),
            Commands::Delete { id } => print_json(&DeleteView {
                deleted: service.delete(user, id)?,
            }),
            Commands::Stats => {
                let stats = StatsService::new(SqliteItemRepository::try_new(&conn)?)
                    .stats_for(user, chrono::Utc::now())?;
                print_json(&stats)
            }
        }
    }
}

fn open_connection(config: &CoreConfig) -> Result<Connection> {
    let path = config.database.path.as_ref().context(
        "no database configured; pass --db <FILE>, set DONOW_DB_PATH, or set database.path in the config file",
    )?;
    info!(
        "event=cli_db module=cli status=start path={}",
        path.display()
    );
    open_db(path).with_context(|| format!("failed to open database `{}`", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_type(value: &str) -> Result<ItemType, String> {
    value.parse().map_err(|err| format!("{err}"))
}

fn parse_status(value: &str) -> Result<ItemStatus, String> {
    value.parse().map_err(|err| format!("{err}"))
}

fn parse_priority(value: &str) -> Result<Priority, String> {
    value.parse().map_err(|err| format!("{err}"))
}

fn parse_time(value: &str) -> Result<i64, String> {
    parse_suggested_date_time(value).ok_or_else(|| format!("unrecognized date/time `{value}`"))
}
