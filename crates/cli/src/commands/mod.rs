// CLI subcommand dispatch.

use clap::Subcommand;

use crate::exit_code::ExitCode;

pub mod blocks;
pub mod env;
pub mod run;

#[derive(Subcommand)]
pub enum Command {
    /// List the codeblocks of a document
    Blocks(blocks::BlocksArgs),
    /// Show the environment a codeblock runs with
    Env(env::EnvArgs),
    /// Run a codeblock and write its output back into the document
    Run(run::RunArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<ExitCode> {
    match cmd {
        Command::Blocks(args) => blocks::run(args),
        Command::Env(args) => env::run(args),
        Command::Run(args) => run::run(args),
    }
}

/// Read a markdown file as lines.
pub(crate) fn read_lines(path: &std::path::Path) -> anyhow::Result<Vec<String>> {
    use anyhow::Context;

    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read `{}`", path.display()))?;
    Ok(text.lines().map(str::to_string).collect())
}
