use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "onestore",
    about = "Inspect revision store files and cell-storage packages",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with decoder limits
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the header, transaction log and file node lists of a revision store file
    Inspect(InspectArgs),
    /// Decode a data element package and show its cells, revisions and objects
    Package(PackageArgs),
}

#[derive(Args)]
pub struct InspectArgs {
    pub file: PathBuf,
    /// Walk every list reachable from the root list
    #[arg(long)]
    pub all: bool,
    /// Fail on node kinds the decoder does not recognize
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args)]
pub struct PackageArgs {
    pub file: PathBuf,
    /// Print every object, not only per-group counts
    #[arg(long)]
    pub objects: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_inspect_with_globals() {
        let args = ["onestore", "inspect", "a.one", "--all", "--format", "json", "-v"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Inspect(args) => {
                assert_eq!(args.file, PathBuf::from("a.one"));
                assert!(args.all);
                assert!(!args.strict);
            }
            Command::Package(_) => panic!("expected inspect"),
        }
    }

    #[test]
    fn parses_package_with_config() {
        let args = ["onestore", "--config", "limits.toml", "package", "p.bin"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("limits.toml")));
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(matches!(cli.command, Command::Package(ref a) if a.file == PathBuf::from("p.bin")));
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["onestore", "inspect", "a.one", "--format", "xml"]).is_err());
    }
}
