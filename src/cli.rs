use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

#[derive(Debug, Parser)]
#[command(
    version = env!("VERSION"),
    about = "Multi-project up/down command runner",
    long_about = None,
    long_version = concat!(
        "version ",
        env!("VERSION"),
        "\n",
        "  commit: ",
        env!("COMMIT"),
        "\n",
        "  built at: ",
        env!("DATE"),
        "\n",
        "  rust version: ",
        env!("RUSTC_VERSION"),
        "\n",
        "  platform: ",
        env!("OS"),
        "/",
        env!("ARCH")
    )
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every project's `up` commands
    Up {
        #[arg(value_name = "group")]
        group: String,

        /// Print what would run without running it
        #[arg(long = "dry-run", default_value_t = false)]
        dry_run: bool,
    },
    /// Run every project's `down` commands and stop tracked processes
    Down {
        #[arg(value_name = "group")]
        group: String,

        #[arg(long = "dry-run", default_value_t = false)]
        dry_run: bool,
    },
    /// List config groups
    #[command(visible_alias = "ls")]
    List,
    /// List tracked background processes
    Procs {
        #[arg(value_name = "group")]
        group: Option<String>,
    },
    /// Stream the log of a tracked background process
    Attach {
        #[arg(value_name = "pid")]
        pid: u32,

        /// Start from the last N lines (0 shows the whole log)
        #[arg(long, default_value_t = 0)]
        tail: usize,

        #[arg(long = "no-follow", default_value_t = false)]
        no_follow: bool,
    },
    /// Stop a tracked background process
    Stop {
        #[arg(value_name = "pid")]
        pid: u32,
    },
    /// Stop a tracked background process and start it again
    Restart {
        #[arg(value_name = "pid")]
        pid: u32,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    commands::run(cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_attach_options() {
        let cli = Cli::try_parse_from(["mdc", "attach", "4242", "--tail", "20", "--no-follow"])
            .expect("parse");
        match cli.command {
            Command::Attach {
                pid,
                tail,
                no_follow,
            } => {
                assert_eq!(pid, 4242);
                assert_eq!(tail, 20);
                assert!(no_follow);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn ls_is_an_alias_for_list() {
        let cli = Cli::try_parse_from(["mdc", "ls"]).expect("parse");
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn up_requires_a_group() {
        assert!(Cli::try_parse_from(["mdc", "up"]).is_err());
        let cli = Cli::try_parse_from(["mdc", "up", "dev", "--dry-run"]).expect("parse");
        assert!(matches!(cli.command, Command::Up { ref group, dry_run: true } if group == "dev"));
    }
}
