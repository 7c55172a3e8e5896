// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use airactionqueue::{ActionQueue, store::SqliteTaskStore};
use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::{args::Args, command::run_command, logging::init_logging, settings::get_configuration};

mod args;
mod command;
mod logging;
mod settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let mut settings =
        get_configuration(args.config.as_deref()).context("Could not load configuration")?;
    if let Some(path) = args.database {
        settings.database.path = path;
    }

    let path = &settings.database.path;
    info!(path = %path.display(), "Opening queue database");
    let store = SqliteTaskStore::open(path)
        .await
        .with_context(|| format!("Could not open queue database {}", path.display()))?;
    let queue = ActionQueue::new(Arc::new(store), settings.queue);

    let mut stdout = std::io::stdout().lock();
    run_command(args.command.unwrap_or_default(), &queue, &mut stdout).await
}
