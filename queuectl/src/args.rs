// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use airactionqueue::TaskStatus;

#[derive(Debug, clap::Parser)]
#[command(version, about = "Inspects and maintains the action queue of a client database")]
pub struct Args {
    /// YAML configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,
    /// Queue database, overrides the configured path
    #[arg(long, short)]
    pub database: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Default, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Number of tasks per status
    #[default]
    Stats,
    /// Lists tasks with the given status, oldest first
    List {
        #[arg(long, short, value_enum, default_value_t = StatusArg::Failed)]
        status: StatusArg,
        /// Maximum number of listed tasks
        #[arg(long, short, default_value_t = 100)]
        limit: u32,
    },
    /// Enqueues a failed task again
    Requeue { id: i64 },
    /// Resets tasks stuck in processing back to pending
    ResetStuck,
    /// Removes completed and failed tasks older than the maximum task age
    Prune,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusArg {
    Pending,
    Processing,
    Failed,
    Completed,
}

impl From<StatusArg> for TaskStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Pending => TaskStatus::Pending,
            StatusArg::Processing => TaskStatus::Processing,
            StatusArg::Failed => TaskStatus::Failed,
            StatusArg::Completed => TaskStatus::Completed,
        }
    }
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;

    #[test]
    fn stats_is_the_default_command() {
        let args = Args::parse_from(["queuectl"]);
        assert_eq!(args.command.unwrap_or_default(), Command::Stats);
    }

    #[test]
    fn list_defaults_to_failed_tasks() {
        let args = Args::parse_from(["queuectl", "--database", "queue.db", "list"]);
        assert_eq!(args.database, Some(PathBuf::from("queue.db")));
        assert_eq!(
            args.command,
            Some(Command::List {
                status: StatusArg::Failed,
                limit: 100
            })
        );
    }

    #[test]
    fn parses_requeue() {
        let args = Args::parse_from(["queuectl", "-c", "queue.yaml", "requeue", "42"]);
        assert_eq!(args.config, Some(PathBuf::from("queue.yaml")));
        assert_eq!(args.command, Some(Command::Requeue { id: 42 }));
    }
}
