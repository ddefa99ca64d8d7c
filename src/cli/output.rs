//! Terminal output for the `veriface-server` binary
//!
//! Every line is printed either with ANSI colors and glyphs or, under
//! `--no-color`, with plain `[TAG]` prefixes so output stays greppable.

use crate::types::{AgentDescriptor, Decision, PipelineResult};
use owo_colors::OwoColorize;

#[derive(Debug, Clone, Copy)]
enum Level {
    Ok,
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Ok => "[OK]",
            Level::Info => "[INFO]",
            Level::Warn => "[WARN]",
            Level::Error => "[ERROR]",
        }
    }
}

/// CLI printer
pub struct Output {
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    pub fn new() -> Self {
        Self { colored: true }
    }

    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Startup banner shown before the server binds
    pub fn banner(&self) {
        let version = format!("v{}", env!("CARGO_PKG_VERSION"));
        if self.colored {
            println!(
                "\n   {} {}\n   {}\n",
                "VERIFACE".bright_cyan().bold(),
                version.dimmed(),
                "identify · fuse · answer".bright_white()
            );
        } else {
            println!("\n   VERIFACE {}\n   identify / fuse / answer\n", version);
        }
    }

    fn status(&self, level: Level, message: &str) {
        if !self.colored {
            match level {
                Level::Error => eprintln!("  {} {}", level.tag(), message),
                _ => println!("  {} {}", level.tag(), message),
            }
            return;
        }

        match level {
            Level::Ok => println!("  {} {}", "✓".green().bold(), message.green()),
            Level::Info => println!("  {} {}", "›".cyan(), message),
            Level::Warn => println!("  {} {}", "!".yellow().bold(), message.yellow()),
            Level::Error => eprintln!("  {} {}", "✗".red().bold(), message.red()),
        }
    }

    pub fn success(&self, message: &str) {
        self.status(Level::Ok, message);
    }

    pub fn info(&self, message: &str) {
        self.status(Level::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.status(Level::Warn, message);
    }

    /// Printed to stderr
    pub fn error(&self, message: &str) {
        self.status(Level::Error, message);
    }

    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bold().underline());
        } else {
            println!("\n  -- {} --", title);
        }
    }

    /// Indented `key: value` line under a header
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {:<12} {}", format!("{}:", key).dimmed(), value);
        } else {
            println!("    {:<12} {}", format!("{}:", key), value);
        }
    }

    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {}", message.dimmed().italic());
        } else {
            println!("\n  hint: {}", message);
        }
    }

    /// Print the agent table used by `agent list` and `config --full`
    pub fn agents(&self, agents: &[AgentDescriptor]) {
        if agents.is_empty() {
            self.warning("No active agents");
            return;
        }

        let width = agents.iter().map(|a| a.name.len()).max().unwrap_or(4).max(4);
        let header = format!(
            "{:<width$}  {:<9}  {:<6}  {}",
            "Name",
            "Threshold",
            "Active",
            "Endpoint",
            width = width
        );
        if self.colored {
            println!("    {}", header.bold());
        } else {
            println!("    {}", header);
        }

        for agent in agents {
            let active = if agent.active { "yes" } else { "no" };
            println!(
                "    {:<width$}  {:<9.2}  {:<6}  {}",
                agent.name,
                agent.threshold,
                active,
                agent.verify_endpoint,
                width = width
            );
        }
    }

    /// Print a one-shot identification result
    pub fn verdict(&self, result: &PipelineResult) {
        let decision = result.verdict.decision.as_str();
        let who = result
            .verdict
            .identity
            .name
            .as_deref()
            .unwrap_or("nobody");
        let line = format!("{} ({}, score {:.2})", decision, who, result.verdict.identity.score);

        if self.colored {
            match result.verdict.decision {
                Decision::Identified => println!("\n  {}", line.bright_green().bold()),
                Decision::Ambiguous => println!("\n  {}", line.yellow().bold()),
                Decision::Unknown => println!("\n  {}", line.red().bold()),
            }
        } else {
            println!("\n  {}", line);
        }

        self.kv("request_id", &result.request_id);
        self.kv(
            "agents",
            &format!(
                "{} queried, {} failed, {} timed out",
                result.agents.queried, result.agents.failures, result.agents.timeouts
            ),
        );
        for candidate in &result.verdict.candidates {
            self.kv("candidate", &format!("{} {:.3}", candidate.name, candidate.score));
        }
        if let Some(answer) = &result.normativa_answer {
            self.kv("answer", &answer.text);
        } else if result.qa_used {
            self.warning("QA service did not answer");
        }
        self.kv("timing_ms", &format!("{:.1}", result.timing_ms));
    }
}
