use clap::Parser;
use keyward::cli::commands::{self, add::AddArgs, edit::EditArgs};
use keyward::cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // A broken config file is reported by the command itself.
    let log_filter = std::env::current_dir()
        .ok()
        .and_then(|dir| keyward::config::Settings::load(&dir).ok())
        .map(|s| s.log_filter)
        .unwrap_or_else(|| "warn".to_string());
    keyward::logging::init(&log_filter);

    let result = match cli.command {
        Commands::Init { ref admin } => commands::init::execute(&cli, admin),
        Commands::Add {
            ref name,
            ref meta,
            policy,
            kind,
            ref value,
            ref file,
            ref groups,
            ref users,
            no_rotate_on_leave,
        } => commands::add::execute(
            &cli,
            AddArgs {
                name,
                meta,
                policy,
                kind,
                value: value.as_deref(),
                file: file.as_deref(),
                groups,
                users,
                rotate_on_leave: !no_rotate_on_leave,
            },
        ),
        Commands::Edit {
            id,
            ref name,
            ref meta,
            policy,
            new_value,
            ref value,
            ref file,
            rotate_on_leave,
            ref set_groups,
            ref set_users,
        } => commands::edit::execute(
            &cli,
            EditArgs {
                id,
                name: name.as_deref(),
                meta,
                policy,
                new_value,
                value: value.as_deref(),
                file: file.as_deref(),
                rotate_on_leave,
                set_groups: set_groups.as_deref(),
                set_users: set_users.as_deref(),
            },
        ),
        Commands::Show { id } => commands::show::execute(&cli, id),
        Commands::Reveal {
            id,
            revision,
            ref output,
        } => commands::reveal::execute(&cli, id, revision, output.as_deref()),
        Commands::Delete { id, force } => commands::delete::execute(&cli, id, force),
        Commands::Share {
            id,
            ref groups,
            ref users,
        } => commands::share::execute(&cli, id, groups, users),
        Commands::List { readable } => commands::list::execute(&cli, readable),
        Commands::Search { ref term } => commands::search::execute(&cli, term),
        Commands::History { id } => commands::history::execute(&cli, id),
        Commands::Request { id, ref reason } => commands::request::execute(&cli, id, reason),
        Commands::Requests { mine } => commands::requests::execute(&cli, mine),
        Commands::Approve { request } => commands::review::approve(&cli, request),
        Commands::Reject {
            request,
            ref reason,
        } => commands::review::reject(&cli, request, reason.as_deref()),
        Commands::RotationDue { ref user } => commands::rotation_due::execute(&cli, user),
        Commands::Audit { last, ref since } => {
            commands::audit_cmd::execute(&cli, last, since.as_deref())
        }
        Commands::Completions { shell } => commands::completions::execute(shell),
    };

    if let Err(e) = result {
        keyward::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}
