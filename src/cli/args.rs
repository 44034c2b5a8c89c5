//! Command-line argument parsing for toolgate
//!
//! Provides clap-based CLI with subcommands and verbosity control.
//! Flags given here override the matching config file values.

use crate::cli::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// toolgate - task-isolated tool dispatch service
#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(version)]
#[command(about = "Dispatch tool calls into isolated task workspaces", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbosity: default info, -v debug, -vv trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Listen address
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port
    #[arg(long)]
    pub port: Option<u16>,

    /// Workspace root (holds tasks/ and locks.json)
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Base URL of the peer tool service
    #[arg(long)]
    pub proxy_url: Option<String>,

    /// Disable the peer tool service
    #[arg(long)]
    pub no_proxy: bool,

    /// Subcommand (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the HTTP service
    Serve,

    /// Build the tool catalog (with proxy discovery) and print it
    Tools {
        /// Ask a running service instead of building a local catalog
        #[arg(long)]
        url: Option<String>,
    },

    /// Execute one tool call against a running service
    Call {
        /// Task id
        #[arg(long)]
        task: String,

        /// Tool name
        #[arg(long)]
        tool: String,

        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Idempotency key
        #[arg(long)]
        request_id: Option<String>,

        /// Service base URL (defaults to the configured listen address)
        #[arg(long)]
        url: Option<String>,
    },

    /// Display current configuration
    Config,
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }

    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }

    /// Fold command-line overrides into the loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(workspace) = &self.workspace {
            config.workspace.root = workspace.to_string_lossy().into_owned();
        }
        if let Some(url) = &self.proxy_url {
            config.proxy.base_url = url.clone();
            config.proxy.enabled = true;
        }
        if self.no_proxy {
            config.proxy.enabled = false;
        }
    }
}

impl Verbosity {
    /// Log level override; `None` keeps the configured level
    pub fn log_level(&self) -> Option<&'static str> {
        match self {
            Verbosity::Quiet => Some("warn"),
            Verbosity::Normal => None,
            Verbosity::Verbose => Some("debug"),
            Verbosity::VeryVerbose => Some("trace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_command_is_serve() {
        let args = parse(&["toolgate"]);
        assert_eq!(args.command(), Commands::Serve);
        assert_eq!(args.verbosity(), Verbosity::Normal);
        assert_eq!(args.verbosity().log_level(), None);
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(parse(&["toolgate", "-q"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["toolgate", "-v"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["toolgate", "-vv"]).verbosity().log_level(), Some("trace"));
    }

    #[test]
    fn test_call_subcommand() {
        let args = parse(&[
            "toolgate",
            "call",
            "--task",
            "demo",
            "--tool",
            "file_read",
            "--params",
            r#"{"file_path":"a.txt"}"#,
            "--request-id",
            "r1",
        ]);
        match args.command() {
            Commands::Call {
                task,
                tool,
                params,
                request_id,
                url,
            } => {
                assert_eq!(task, "demo");
                assert_eq!(tool, "file_read");
                assert!(params.contains("a.txt"));
                assert_eq!(request_id.as_deref(), Some("r1"));
                assert!(url.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_call_requires_named_flags() {
        assert!(Args::try_parse_from(["toolgate", "call", "demo", "file_read"]).is_err());

        let args = parse(&["toolgate", "call", "--task", "demo", "--tool", "dir_list"]);
        match args.command() {
            Commands::Call { params, .. } => assert_eq!(params, "{}"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_tools_defaults_to_local_catalog() {
        assert_eq!(parse(&["toolgate", "tools"]).command(), Commands::Tools { url: None });
        assert_eq!(
            parse(&["toolgate", "tools", "--url", "http://127.0.0.1:8001"]).command(),
            Commands::Tools {
                url: Some("http://127.0.0.1:8001".into())
            }
        );
    }

    #[test]
    fn test_overrides_applied() {
        let args = parse(&[
            "toolgate",
            "--port",
            "9100",
            "--workspace",
            "/srv/ws",
            "--no-proxy",
        ]);
        let mut config = Config::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.workspace.root, "/srv/ws");
        assert!(!config.proxy.enabled);
    }
}
