use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context};

use slackord_core::{
    config::Config,
    coordinator::ImportCoordinator,
    domain::ExportMode,
    logging::{self, TracingLogSink},
    progress::{percentage, ProgressSink},
    run::RunStatus,
};
use slackord_discord::DiscordTarget;

const USAGE: &str = "usage: slackord [--full | --partial] [EXPORT_PATH]

Rebuilds a Slack export on a Discord server. Configuration is read from the
environment (DISCORD_BOT_TOKEN, DISCORD_GUILD_ID, SLACKORD_*) and .env.";

#[derive(Debug, PartialEq, Eq)]
struct Args {
    export_path: PathBuf,
    mode: ExportMode,
}

/// `None` when only help was requested.
fn parse_args(
    args: impl IntoIterator<Item = String>,
    default_path: Option<PathBuf>,
    default_mode: ExportMode,
) -> anyhow::Result<Option<Args>> {
    let mut export_path = default_path;
    let mut mode = default_mode;
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--full" => mode = ExportMode::Full,
            "--partial" => mode = ExportMode::Partial,
            s if s.starts_with('-') => bail!("unknown option {s}\n\n{USAGE}"),
            _ => export_path = Some(PathBuf::from(arg)),
        }
    }
    let export_path =
        export_path.context("no export path: pass one or set SLACKORD_EXPORT_PATH")?;
    Ok(Some(Args { export_path, mode }))
}

/// Progress on stderr so stdout only carries the final summary.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, processed: usize, total: usize, unit: &str) {
        if total > 0 {
            eprintln!(
                "[{:>5.1}%] {processed}/{total} {unit}",
                percentage(processed, total)
            );
        }
    }

    fn on_channel_started(&self, name: &str, file_count: usize) {
        eprintln!("#{name}: {file_count} files");
    }

    fn on_channel_completed(&self, name: &str) {
        eprintln!("#{name}: delivered");
    }

    fn on_hidden_file_count_final(&self, count: usize) {
        if count > 0 {
            eprintln!("{count} files were hidden by Slack's export limits");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("slackord")?;

    let cfg = Config::load()?;
    let Some(args) = parse_args(
        std::env::args().skip(1),
        cfg.export_path.clone(),
        cfg.export_mode,
    )?
    else {
        println!("{USAGE}");
        return Ok(());
    };

    tracing::info!(
        path = %args.export_path.display(),
        mode = %args.mode,
        user_format = %cfg.import.display_policy,
        timestamps = %cfg.import.timestamp_format,
        "starting import"
    );

    let target = Arc::new(DiscordTarget::new(&cfg.discord)?);
    let coordinator = ImportCoordinator::new(
        target,
        cfg.import.clone(),
        Arc::new(TracingLogSink),
        Arc::new(ConsoleProgress),
    );

    let cancel = coordinator.begin_run();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling import");
            on_interrupt.cancel();
        }
    });

    let summary = coordinator.run(&args.export_path, args.mode, cancel).await;
    println!("{summary}");

    if summary.status == RunStatus::Failed {
        bail!(
            "import failed: {}",
            summary.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
