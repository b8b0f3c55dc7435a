use clap::{Parser, Subcommand};

use crate::commands;

/// Flowforge CLI - validate, inspect, and run YAML workflows
#[derive(Parser, Debug)]
#[command(name = "forgectl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Project root that script paths are sandboxed to
    #[arg(long, global = true, env = "FORGECTL_PROJECT_ROOT", default_value = ".")]
    pub project_root: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a workflow file and print the findings
    Validate {
        /// Workflow file (YAML)
        #[arg(short, long)]
        file: String,
    },

    /// Show execution levels and parallelism for a workflow
    Graph {
        /// Workflow file (YAML)
        #[arg(short, long)]
        file: String,
    },

    /// Execute a workflow
    Run {
        /// Workflow file (YAML)
        #[arg(short, long)]
        file: String,

        /// Workflow inputs as key=value pairs (value parsed as JSON when
        /// possible, else taken as a string)
        #[arg(short, long)]
        input: Vec<String>,

        /// Execute level members concurrently
        #[arg(long)]
        parallel: bool,

        /// Concurrency bound within one level
        #[arg(long, default_value_t = 4)]
        max_concurrency: usize,

        /// Interpreter binary for script steps
        #[arg(long, env = "FORGECTL_INTERPRETER", default_value = "python3")]
        interpreter: String,

        /// Per-script timeout in milliseconds
        #[arg(long, default_value_t = 30_000)]
        script_timeout_ms: u64,

        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        output: String,
    },

    /// Show version information
    Version,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Validate { file } => commands::validate::execute(&file).await,
            Commands::Graph { file } => commands::graph::execute(&file).await,
            Commands::Run {
                file,
                input,
                parallel,
                max_concurrency,
                interpreter,
                script_timeout_ms,
                output,
            } => {
                commands::run::execute(commands::run::RunArgs {
                    file,
                    inputs: input,
                    parallel,
                    max_concurrency,
                    interpreter,
                    script_timeout_ms,
                    output,
                    project_root: self.project_root,
                })
                .await
            }
            Commands::Version => commands::version::execute(),
            Commands::Completion { shell } => commands::completion::execute(shell),
        }
    }
}
