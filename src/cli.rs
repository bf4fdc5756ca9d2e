//! # Command Line Interface
//!
//! `serve` runs the watchers and the API until interrupted; `render` and
//! `reconcile` perform a single pass and exit.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "routeplane")]
#[command(about = "Reverse proxy configuration control plane")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Database URL override
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Upstream URL override
    #[arg(long, global = true)]
    pub upstream_url: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the watchers and serve the merged configuration (default)
    Serve,

    /// Print the merged configuration once and exit
    Render {
        /// Pretty-print instead of the canonical compact form
        #[arg(long)]
        pretty: bool,
    },

    /// Run one resource and service reconcile pass and exit
    Reconcile,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_default() {
        let cli = Cli::parse_from(["routeplane"]);
        assert_eq!(cli.command(), Commands::Serve);
    }

    #[test]
    fn test_render_flags() {
        let cli = Cli::parse_from([
            "routeplane",
            "render",
            "--pretty",
            "--database-url",
            "sqlite://x.db",
        ]);
        assert_eq!(cli.command(), Commands::Render { pretty: true });
        assert_eq!(cli.database_url.as_deref(), Some("sqlite://x.db"));
    }
}
