use clap::CommandFactory;
use clap_complete::Shell;

use crate::cli::Cli;

/// Generate a shell completion script on stdout
pub fn execute(shell: Shell) -> anyhow::Result<()> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
    Ok(())
}
