// Entry point: parse arguments, build the Context, dispatch one command.
// Handlers live in commands.rs; nothing below touches the network directly.
mod api;
mod auth;
mod cli;
mod commands;
mod config;
mod context;
mod output;
mod resources;
mod update;
mod validate;

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{ChannelCommand, CheckCommand, Cli, Command, IncidentCommand, UserCommand};
use config::Endpoints;
use context::Context;
use output::OutputFormat;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    // Usage errors exit 1 like every other failure; --help exits 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing(cli.verbose);

    let stdout = io::stdout();
    match run(cli, &config::endpoints(), &mut stdout.lock(), &mut io::stderr()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    cli: Cli,
    endpoints: &Endpoints,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> anyhow::Result<()> {
    if let Command::Version = cli.command {
        return commands::version(out);
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_path()?,
    };
    let ctx = Context::build(
        &config_path,
        endpoints,
        OutputFormat::from_flag(cli.json),
        cli.command.requires_config(),
    )?;

    let notify = cli.command.wants_update_notice();
    dispatch(&ctx, cli.command, out)?;
    out.flush()?;

    // Runs only after a successful command.
    if notify {
        if let Some(notice) = commands::update_notice(&ctx) {
            writeln!(err, "[binocs] {notice}")?;
        }
    }
    Ok(())
}

fn dispatch(ctx: &Context, command: Command, out: &mut dyn Write) -> anyhow::Result<()> {
    match command {
        Command::Login(args) => commands::login(ctx, &args, out),
        Command::Logout => commands::logout(ctx, out),
        Command::User { command } => match command {
            None => commands::user_show(ctx, out),
            Some(UserCommand::Update(args)) => commands::user_update(ctx, &args, out),
            Some(UserCommand::GenerateKey) => commands::generate_key(ctx, out),
            Some(UserCommand::InvalidateKey) => commands::invalidate_key(ctx, out),
        },
        Command::Check { command } => match command {
            None | Some(CheckCommand::List) => commands::check_list(ctx, out),
            Some(CheckCommand::Add(args)) => commands::check_add(ctx, &args, out),
            Some(CheckCommand::Inspect(ident)) => commands::check_inspect(ctx, &ident.id, out),
            Some(CheckCommand::Update { ident, fields }) => {
                commands::check_update(ctx, &ident.id, &fields, out)
            }
            Some(CheckCommand::Delete(ident)) => commands::check_delete(ctx, &ident.id, out),
        },
        Command::Channel { command } => match command {
            None => commands::channel_list(ctx, &Default::default(), out),
            Some(ChannelCommand::List(filter)) => commands::channel_list(ctx, &filter, out),
            Some(ChannelCommand::Inspect(ident)) => commands::channel_inspect(ctx, &ident.id, out),
        },
        Command::Incident { command } => match command {
            None => commands::incident_list(ctx, &Default::default(), out),
            Some(IncidentCommand::List(filter)) => commands::incident_list(ctx, &filter, out),
            Some(IncidentCommand::Inspect(ident)) => {
                commands::incident_inspect(ctx, &ident.id, out)
            }
        },
        Command::Regions => commands::regions(ctx, out),
        Command::Upgrade(args) => commands::upgrade(ctx, &args, out),
        Command::Version => commands::version(out),
    }
}
