use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Configuration file, layered over the defaults and the user
    /// configuration directory.
    #[arg(short, long, global = true, env = "STACKS_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch every library and keep the catalog in sync until interrupted.
    Run,
    /// Register a directory as a library.
    Add {
        path: PathBuf,
        /// Display name; defaults to the directory name.
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Remove a library and everything catalogued beneath it.
    Remove { id: i64 },
    /// List registered libraries.
    List,
    /// Reconcile once and exit.
    Scan {
        /// Only this library.
        id: Option<i64>,
    },
    /// Permanently remove series and books flagged as deleted.
    Purge,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["stacks", "run"], None)]
    #[case(&["stacks", "scan", "--config", "stacks.toml"], Some("stacks.toml"))]
    #[case(&["stacks", "-c", "other.yaml", "list"], Some("other.yaml"))]
    fn test_global_config_flag(#[case] args: &[&str], #[case] config: Option<&str>) {
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, config.map(PathBuf::from));
    }

    #[test]
    fn test_add_arguments() {
        let cli = Cli::try_parse_from(["stacks", "add", "/srv/books", "--name", "Books"]).unwrap();
        let Command::Add { path, name } = cli.command else {
            panic!("expected add");
        };
        assert_eq!(path, PathBuf::from("/srv/books"));
        assert_eq!(name.as_deref(), Some("Books"));
    }

    #[test]
    fn test_scan_id_is_optional() {
        assert!(matches!(Cli::try_parse_from(["stacks", "scan"]).unwrap().command, Command::Scan { id: None }));
        assert!(matches!(
            Cli::try_parse_from(["stacks", "scan", "3"]).unwrap().command,
            Command::Scan { id: Some(3) }
        ));
        assert!(Cli::try_parse_from(["stacks", "remove"]).is_err());
    }
}
