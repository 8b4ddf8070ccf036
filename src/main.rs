use clap::Parser;
use std::io::{self, IsTerminal};
use tangle::cli::commands::{self, GlobalOpts};
use tangle::cli::{Cli, Commands};
use tangle::error::{StructuredError, TangleError};
use tangle::logging::init_logging;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet, None) {
        eprintln!("Failed to initialize logging: {e}");
        // Continue without tracing rather than aborting the command.
    }

    let opts = GlobalOpts {
        db: cli.db.clone(),
        actor: cli.actor.clone(),
        json: cli.json,
        lock_timeout: cli.lock_timeout,
    };

    let result = match cli.command {
        Commands::Init { prefix, force } => commands::init::execute(prefix.as_deref(), force, &opts),
        Commands::Create(args) => commands::create::execute(&args, &opts),
        Commands::List(args) => commands::list::execute(&args, &opts),
        Commands::Show { ids } => commands::show::execute(&ids, &opts),
        Commands::Update(args) => commands::update::execute(&args, &opts),
        Commands::Close(args) => commands::close::execute(&args, &opts),
        Commands::Delete(args) => commands::delete::execute(&args, &opts),
        Commands::Dep { command } => commands::dep::execute(&command, &opts),
        Commands::Sync(args) => commands::sync::execute(&args, &opts),
    };

    if let Err(e) = result {
        handle_error(&e, cli.json);
    }
}

/// Report a failed command and exit with its mapped code.
///
/// When --json is set or stdout is not a terminal, emits the structured
/// JSON body to stderr; otherwise prints the human-readable form.
fn handle_error(err: &TangleError, json_mode: bool) -> ! {
    let structured = StructuredError::from_error(err);
    let exit_code = structured.code.exit_code();

    let use_json = json_mode || !io::stdout().is_terminal();
    if use_json {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        eprintln!("{}", structured.to_human());
    }

    std::process::exit(exit_code);
}
