pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::user::LinkRequest;

#[derive(Debug, Parser)]
#[command(
    name = "prsync",
    about = "prsync operator CLI",
    long_about = "Run migrations, inspect configuration, and manage repository registrations, \
                  channel tracking, identity links, and workspace installs.",
    after_help = "Examples:\n  prsync migrate\n  prsync repo register acme/api --workspace T0123 --channel C0456\n  prsync user link --workspace T0123 --slack-user U0789 --github-login octocat"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, GitHub API access, and database schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Manage which repositories notify which workspaces")]
    Repo(RepoCommand),
    #[command(subcommand, about = "Configure per-channel behavior")]
    Channel(ChannelCommand),
    #[command(subcommand, about = "Manage Slack to GitHub identity links")]
    User(UserCommand),
    #[command(subcommand, about = "Manage workspace bot installations")]
    Workspace(WorkspaceCommand),
    #[command(subcommand, about = "Inspect the durable job queue")]
    Queue(QueueCommand),
}

#[derive(Debug, Subcommand)]
enum RepoCommand {
    #[command(about = "Register or re-enable a repository for a workspace")]
    Register {
        #[arg(help = "Repository in owner/name form")]
        repo: String,
        #[arg(long)]
        workspace: String,
        #[arg(long, help = "Default notification channel id")]
        channel: Option<String>,
    },
    #[command(about = "Stop notifying a workspace about a repository")]
    Disable {
        repo: String,
        #[arg(long)]
        workspace: String,
    },
    #[command(about = "List registrations for a workspace")]
    List {
        #[arg(long)]
        workspace: String,
    },
}

#[derive(Debug, Subcommand)]
enum ChannelCommand {
    #[command(about = "Turn manual PR link tracking on or off for a channel")]
    Tracking {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        channel: String,
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    #[command(about = "Link a Slack user to a GitHub login")]
    Link {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        slack_user: String,
        #[arg(long)]
        github_login: String,
        #[arg(long, help = "Personal default notification channel id")]
        channel: Option<String>,
        #[arg(long, help = "Store the link without verification")]
        unverified: bool,
        #[arg(long, help = "Do not auto-register repositories for this user's PRs")]
        no_notifications: bool,
    },
}

#[derive(Debug, Subcommand)]
enum WorkspaceCommand {
    #[command(about = "Store bot credentials for a workspace")]
    Install {
        #[arg(long)]
        workspace: String,
        #[arg(long, env = "PRSYNC_INSTALL_BOT_TOKEN", hide_env_values = true)]
        bot_token: String,
        #[arg(long, help = "Bot user id, used to ignore the bot's own messages")]
        bot_user: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum QueueCommand {
    #[command(about = "Count jobs per queue state")]
    Status,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Repo(RepoCommand::Register { repo, workspace, channel }) => {
            commands::repo::register(&repo, &workspace, channel.as_deref())
        }
        Command::Repo(RepoCommand::Disable { repo, workspace }) => {
            commands::repo::disable(&repo, &workspace)
        }
        Command::Repo(RepoCommand::List { workspace }) => commands::repo::list(&workspace),
        Command::Channel(ChannelCommand::Tracking { workspace, channel, state }) => {
            commands::channel::set_tracking(&workspace, &channel, state == "on")
        }
        Command::User(UserCommand::Link {
            workspace,
            slack_user,
            github_login,
            channel,
            unverified,
            no_notifications,
        }) => commands::user::link(LinkRequest {
            workspace: &workspace,
            slack_user: &slack_user,
            github_login: &github_login,
            default_channel: channel.as_deref(),
            unverified,
            notifications_enabled: !no_notifications,
        }),
        Command::Workspace(WorkspaceCommand::Install { workspace, bot_token, bot_user }) => {
            commands::workspace::install(&workspace, &bot_token, bot_user.as_deref())
        }
        Command::Queue(QueueCommand::Status) => commands::queue::status(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
