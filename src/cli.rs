use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Command-line client for the binocs uptime monitoring service
#[derive(Parser, Debug)]
#[command(name = "binocs", about, long_about = None)]
pub struct Cli {
    /// Print diagnostic output to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Path to the config file (default: ~/.binocs/config.json)
    #[arg(long, global = true, env = "BINOCS_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print records as JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Exchange your access key and secret key for an access token
    #[command(alias = "auth")]
    Login(LoginArgs),

    /// Forget stored credentials
    Logout,

    /// Show or manage your account
    #[command(alias = "account")]
    User {
        #[command(subcommand)]
        command: Option<UserCommand>,
    },

    /// List or manage checks
    #[command(alias = "checks")]
    Check {
        #[command(subcommand)]
        command: Option<CheckCommand>,
    },

    /// List or inspect notification channels
    #[command(alias = "channels")]
    Channel {
        #[command(subcommand)]
        command: Option<ChannelCommand>,
    },

    /// List or inspect incidents
    #[command(alias = "incidents")]
    Incident {
        #[command(subcommand)]
        command: Option<IncidentCommand>,
    },

    /// List regions checks can run from
    Regions,

    /// Upgrade binocs to the latest release
    Upgrade(UpgradeArgs),

    /// Print the client version
    Version,
}

impl Command {
    /// Whether the passive "update available" notice may follow this command.
    /// Credential verbs stay offline apart from their own request.
    pub fn wants_update_notice(&self) -> bool {
        !matches!(
            self,
            Command::Login(_) | Command::Logout | Command::Upgrade(_) | Command::Version
        )
    }

    /// Whether an unreadable config file must stop this command.
    pub fn requires_config(&self) -> bool {
        !matches!(self, Command::Upgrade(_) | Command::Version)
    }
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// 10 uppercase letters or digits (default: the stored key)
    #[arg(long)]
    pub access_key: Option<String>,

    /// 16 lowercase letters or digits (default: the stored key)
    #[arg(long)]
    pub secret_key: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Update profile fields
    Update(UserUpdateArgs),
    /// Create a new access key / secret key pair
    GenerateKey,
    /// Revoke the current key pair and log out
    InvalidateKey,
}

#[derive(Args, Debug)]
pub struct UserUpdateArgs {
    #[arg(long)]
    pub name: Option<String>,
    /// IANA time zone, e.g. Europe/Prague
    #[arg(long)]
    pub timezone: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum CheckCommand {
    /// Create a check
    Add(CheckArgs),
    /// Show one check
    Inspect(IdentArg),
    /// Change a check
    Update {
        #[command(flatten)]
        ident: IdentArg,
        #[command(flatten)]
        fields: CheckArgs,
    },
    /// Delete a check
    Delete(IdentArg),
    /// List checks
    #[command(alias = "ls")]
    List,
}

#[derive(Args, Debug, Default)]
pub struct CheckArgs {
    #[arg(long)]
    pub name: Option<String>,
    /// URL to probe
    #[arg(long)]
    pub resource: Option<String>,
    /// HTTP method
    #[arg(long)]
    pub method: Option<String>,
    /// Seconds between probes
    #[arg(long)]
    pub interval: Option<u32>,
    /// Response time target in seconds
    #[arg(long)]
    pub target: Option<f64>,
    /// Comma-separated region names
    #[arg(long, value_delimiter = ',')]
    pub regions: Option<Vec<String>>,
    /// Status codes considered up, e.g. "200-302"
    #[arg(long)]
    pub up_codes: Option<String>,
    #[arg(long)]
    pub up_confirmations_threshold: Option<u32>,
    #[arg(long)]
    pub down_confirmations_threshold: Option<u32>,
}

#[derive(Args, Debug)]
pub struct IdentArg {
    /// Five lowercase hex characters
    pub id: String,
}

#[derive(Subcommand, Debug)]
pub enum ChannelCommand {
    /// Show one channel
    Inspect(IdentArg),
    /// List channels
    #[command(alias = "ls")]
    List(FilterArgs),
}

#[derive(Subcommand, Debug)]
pub enum IncidentCommand {
    /// Show one incident
    Inspect(IdentArg),
    /// List incidents
    #[command(alias = "ls")]
    List(FilterArgs),
}

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Only show records attached to this check
    #[arg(long)]
    pub check: Option<String>,
}

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Only report whether a newer release exists
    #[arg(long)]
    pub check: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn aliases_resolve() {
        let cli = Cli::try_parse_from(["binocs", "auth", "--access-key", "ABCDEFGHIJ"]).unwrap();
        assert!(matches!(cli.command, Command::Login(_)));
        let cli = Cli::try_parse_from(["binocs", "checks"]).unwrap();
        assert!(matches!(cli.command, Command::Check { command: None }));
        let cli = Cli::try_parse_from(["binocs", "account", "generate-key"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::User {
                command: Some(UserCommand::GenerateKey)
            }
        ));
    }

    #[test]
    fn inspect_requires_exactly_one_id() {
        assert!(Cli::try_parse_from(["binocs", "check", "inspect"]).is_err());
        assert!(Cli::try_parse_from(["binocs", "check", "inspect", "aaaaa", "bbbbb"]).is_err());
        assert!(Cli::try_parse_from(["binocs", "channel", "inspect", "aaaaa"]).is_ok());
    }

    #[test]
    fn global_flags_work_after_the_verb() {
        let cli = Cli::try_parse_from(["binocs", "regions", "--verbose", "--config", "/tmp/c.json"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
    }

    #[test]
    fn check_update_takes_id_and_fields() {
        let cli = Cli::try_parse_from([
            "binocs", "check", "update", "0a1b2", "--interval", "30", "--regions", "eu,us",
        ])
        .unwrap();
        match cli.command {
            Command::Check {
                command: Some(CheckCommand::Update { ident, fields }),
            } => {
                assert_eq!(ident.id, "0a1b2");
                assert_eq!(fields.interval, Some(30));
                assert_eq!(fields.regions, Some(vec!["eu".to_string(), "us".to_string()]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn upgrade_notice_skips_credential_and_upgrade_verbs() {
        assert!(!Command::Version.wants_update_notice());
        assert!(!Command::Upgrade(UpgradeArgs { check: true }).wants_update_notice());
        assert!(!Command::Logout.wants_update_notice());
        let login = Cli::try_parse_from(["binocs", "login"]).unwrap().command;
        assert!(!login.wants_update_notice());
        assert!(Command::Regions.wants_update_notice());
    }

    #[test]
    fn only_upgrade_tolerates_a_broken_config() {
        assert!(!Command::Upgrade(UpgradeArgs { check: false }).requires_config());
        assert!(Command::Regions.requires_config());
        assert!(Command::Logout.requires_config());
    }
}
