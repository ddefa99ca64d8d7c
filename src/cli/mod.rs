//! CLI module for Veriface
//!
//! Provides command-line interface parsing for the veriface-server binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod output;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Veriface - biometric identification orchestrator
#[derive(Parser, Debug)]
#[command(
    name = "veriface-server",
    version,
    about = "Veriface - biometric identification orchestrator",
    long_about = "Fans a captured image out to per-person verification agents, fuses their\n\
                  scores into identified / ambiguous / unknown, and answers regulations\n\
                  questions for confidently identified callers.\n\n\
                  Run without arguments to start the server.",
    after_help = "EXAMPLES:\n    \
                  veriface-server                              # Start the server (requires veriface.toml)\n    \
                  veriface-server --config prod.toml           # Use a custom config file\n    \
                  veriface-server config --validate            # Check configuration and warnings\n    \
                  veriface-server agent sync                   # Copy [agents] into the database\n    \
                  veriface-server identify --image face.jpg    # Run the pipeline once\n    \
                  veriface-server mcp                          # Serve MCP tools over stdio"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "veriface.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show configuration information
    Config {
        /// Show the full configuration
        #[arg(short = 'f', long)]
        full: bool,

        /// Validate the configuration file and report warnings
        #[arg(long)]
        validate: bool,
    },

    /// Manage verification agents
    #[command(subcommand)]
    Agent(AgentCommands),

    /// Run one identification against the configured agents and print the result
    Identify {
        /// Image file (JPEG or PNG)
        #[arg(short, long)]
        image: PathBuf,

        /// Question for the regulations QA service
        #[arg(short, long)]
        question: Option<String>,

        /// Caller identifier recorded in the audit trail
        #[arg(long)]
        user_id: Option<String>,

        /// Caller category recorded in the audit trail
        #[arg(long)]
        user_type: Option<String>,
    },

    /// Serve the identify_person and ask_normativa tools over MCP stdio
    #[cfg(feature = "mcp")]
    Mcp,
}

impl Commands {
    /// Whether stdout is reserved for a protocol stream rather than human output.
    pub fn owns_stdout(&self) -> bool {
        match self {
            #[cfg(feature = "mcp")]
            Commands::Mcp => true,
            _ => false,
        }
    }
}

/// Agent management subcommands
#[derive(Subcommand, Debug)]
pub enum AgentCommands {
    /// List active agents from the configured registry source
    List,

    /// Upsert the [agents] tables from the config file into the database registry
    Sync,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// MIME type implied by an image file extension.
pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::try_parse_from(["veriface-server"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("veriface.toml"));
        assert!(!cli.log_json);
    }

    #[test]
    fn test_identify_arguments() {
        let cli = Cli::try_parse_from([
            "veriface-server",
            "--config",
            "other.toml",
            "identify",
            "--image",
            "face.png",
            "--question",
            "When does the library open?",
            "--user-type",
            "student",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Identify {
                image,
                question,
                user_id,
                user_type,
            }) => {
                assert_eq!(image, PathBuf::from("face.png"));
                assert_eq!(question.as_deref(), Some("When does the library open?"));
                assert!(user_id.is_none());
                assert_eq!(user_type.as_deref(), Some("student"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }

    #[test]
    fn test_agent_subcommands() {
        let cli = Cli::try_parse_from(["veriface-server", "agent", "sync", "--verbose"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Agent(AgentCommands::Sync))));
        assert!(cli.verbose);
    }

    #[cfg(feature = "mcp")]
    #[test]
    fn test_mcp_subcommand_owns_stdout() {
        let cli = Cli::try_parse_from(["veriface-server", "mcp"]).unwrap();
        let command = cli.command.unwrap();
        assert!(matches!(command, Commands::Mcp));
        assert!(command.owns_stdout());

        let cli = Cli::try_parse_from(["veriface-server", "agent", "list"]).unwrap();
        assert!(!cli.command.unwrap().owns_stdout());
    }

    #[test]
    fn test_identify_requires_image() {
        assert!(Cli::try_parse_from(["veriface-server", "identify"]).is_err());
    }

    #[test]
    fn test_mime_from_path() {
        assert_eq!(mime_from_path(Path::new("a/b.JPG")), Some("image/jpeg"));
        assert_eq!(mime_from_path(Path::new("x.png")), Some("image/png"));
        assert_eq!(mime_from_path(Path::new("x.gif")), None);
        assert_eq!(mime_from_path(Path::new("noext")), None);
    }
}
