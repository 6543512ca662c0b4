use std::path::PathBuf;

use clap::Parser;

/// Interactive console for reviewed, permission-scoped tools.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolgate", version, about)]
pub struct Cli {
    /// Configuration file (defaults to $TOOLGATE_CONFIG, then built-in defaults).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Identity commands run as.
    #[arg(long, short = 'i', default_value = "cli_agent")]
    pub identity: String,

    /// Directory holding the catalog and logs, overriding the configuration.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Do not grant every loaded tool to the identity on start.
    #[arg(long)]
    pub no_auto_grant: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_cli_agent() {
        let cli = Cli::parse_from(["toolgate"]);
        assert_eq!(cli.identity, "cli_agent");
        assert!(cli.config.is_none());
        assert!(!cli.no_auto_grant);

        let cli = Cli::parse_from(["toolgate", "-i", "alice", "--data-dir", "/tmp/tg"]);
        assert_eq!(cli.identity, "alice");
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/tg")));
    }
}
