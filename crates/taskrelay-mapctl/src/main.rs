//! Management CLI for the mapping file consumed by taskrelay-server.
//!
//! The server only ever reads that file; all mutation goes through this tool.
//! Writes are temp-file + rename, so a server reloading mid-edit never sees a
//! torn table.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use taskrelay_mapping::{load_for_edit, save_table, MappingTable};

#[derive(Parser, Debug)]
#[command(
    name = "taskrelay-mapctl",
    about = "Edits the leader roster and user-to-chat mapping used by taskrelay-server"
)]
struct MapctlArgs {
    #[arg(long, env = "TASKRELAY_MAPPINGS_FILE", default_value = "user_mappings.json")]
    mappings_file: PathBuf,

    #[command(subcommand)]
    command: MapctlCommand,
}

#[derive(Subcommand, Debug)]
enum MapctlCommand {
    /// Register a platform user as a leader.
    AddLeader { user_id: String },
    /// Remove a platform user from the leader roster.
    RemoveLeader { user_id: String },
    /// Map a platform user to the Telegram chat receiving their notifications.
    MapChat { user_id: String, chat_id: String },
    /// Remove a platform user's Telegram chat mapping.
    UnmapChat { user_id: String },
    /// Print the current mapping table as JSON.
    List,
}

fn main() -> Result<()> {
    let args = MapctlArgs::parse();
    let mut table = load_for_edit(&args.mappings_file)?;

    if let MapctlCommand::List = args.command {
        let rendered =
            serde_json::to_string_pretty(&table).context("failed to render mapping table")?;
        println!("{rendered}");
        return Ok(());
    }

    let summary = apply_command(&mut table, &args.command);
    save_table(&args.mappings_file, &table)?;
    println!("{summary}");
    Ok(())
}

fn apply_command(table: &mut MappingTable, command: &MapctlCommand) -> String {
    match command {
        MapctlCommand::AddLeader { user_id } => {
            if table.add_leader(user_id) {
                format!("added leader {user_id}")
            } else {
                format!("user {user_id} is already a leader")
            }
        }
        MapctlCommand::RemoveLeader { user_id } => {
            if table.remove_leader(user_id) {
                format!("removed leader {user_id}")
            } else {
                format!("user {user_id} was not a leader")
            }
        }
        MapctlCommand::MapChat { user_id, chat_id } => match table.set_chat(user_id, chat_id) {
            Some(previous) => format!("remapped user {user_id}: {previous} -> {chat_id}"),
            None => format!("mapped user {user_id} to chat {chat_id}"),
        },
        MapctlCommand::UnmapChat { user_id } => match table.remove_chat(user_id) {
            Some(previous) => format!("unmapped user {user_id} from chat {previous}"),
            None => format!("user {user_id} had no chat mapping"),
        },
        MapctlCommand::List => unreachable!("list never mutates"),
    }
}
