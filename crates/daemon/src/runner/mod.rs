// Runner strategies: turn a codeblock body into an executable command line.
//
// Each language tag maps to one `Runner` variant. Per-run scratch files live
// in a temporary directory owned by the returned `PreparedCommand`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use fencerun_common::codeblock::{DOCKER_CWD_PREFIX, OPT_CWD, OPT_DOCKER, OPT_FULL_FILE, OPT_IMAGE};

mod compiled;
mod container;
mod interpreted;
mod shell;

pub const DEFAULT_OUTPUT_FLAG: &str = "-o";
pub const CODE_PLACEHOLDER: &str = "{{code}}";

const GO_TEMPLATE: &str = "package main\n\nfunc main() {\n{{code}}\n}\n";

/// A fully resolved process invocation.
#[derive(Debug)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Bindings added on top of the inherited process environment.
    pub env: BTreeMap<String, String>,
    /// Scratch directory holding generated sources; removed on drop.
    pub scratch: Option<TempDir>,
}

impl PreparedCommand {
    /// Human-readable command line for logs and error messages.
    pub fn display(&self) -> String {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(words.clone()).unwrap_or_else(|_| words.collect::<Vec<_>>().join(" "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Runner {
    /// Runs the body as a script with `shell`.
    Shell { shell: String },
    /// Writes the body to `file_name` and runs `interpreter ./file_name`.
    Interpreted {
        interpreter: String,
        file_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
    /// Compiles `file_name` into `main` and runs it.
    Compiled {
        compiler: String,
        #[serde(default = "default_output_flag")]
        output_flag: String,
        file_name: String,
    },
}

fn default_output_flag() -> String {
    DEFAULT_OUTPUT_FLAG.to_string()
}

/// One entry of the `runners` config list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerConfig {
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub runner: Runner,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.languages.iter().all(|language| language.trim().is_empty()) {
            return Err("runner config needs at least one language".into());
        }
        match &self.runner {
            Runner::Shell { shell } if shell.trim().is_empty() => Err("shell runner needs `shell`".into()),
            Runner::Interpreted { interpreter, .. } if interpreter.trim().is_empty() => {
                Err("interpreted runner needs `interpreter`".into())
            }
            Runner::Interpreted { file_name, .. } | Runner::Compiled { file_name, .. }
                if file_name.trim().is_empty() =>
            {
                Err("runner needs `file_name`".into())
            }
            Runner::Compiled { compiler, .. } if compiler.trim().is_empty() => {
                Err("compiled runner needs `compiler`".into())
            }
            Runner::Interpreted { interpreter: command, .. } | Runner::Compiled { compiler: command, .. }
                if shlex::split(command).is_none() =>
            {
                Err(format!("unbalanced quotes in `{command}`"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerEntry {
    pub runner: Runner,
    pub image: Option<String>,
}

/// Language tag → runner.
#[derive(Debug, Clone, Default)]
pub struct RunnerTable {
    entries: HashMap<String, RunnerEntry>,
}

impl RunnerTable {
    /// The built-in table with `overrides` applied on top, language by language.
    pub fn with_overrides(overrides: &[RunnerConfig]) -> Self {
        let mut table = Self::builtin();
        for config in overrides {
            table.insert(config);
        }
        table
    }

    pub fn builtin() -> Self {
        let mut table = Self::default();
        for config in builtin_runners() {
            table.insert(&config);
        }
        table
    }

    fn insert(&mut self, config: &RunnerConfig) {
        for language in &config.languages {
            self.entries.insert(
                language.trim().to_string(),
                RunnerEntry { runner: config.runner.clone(), image: config.image.clone() },
            );
        }
    }

    pub fn resolve(&self, language: &str) -> Option<&RunnerEntry> {
        self.entries.get(language)
    }

    pub fn languages(&self) -> Vec<&str> {
        let mut languages: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        languages.sort_unstable();
        languages
    }
}

fn shell(languages: &[&str], shell: &str) -> RunnerConfig {
    RunnerConfig {
        languages: languages.iter().map(|l| l.to_string()).collect(),
        image: None,
        runner: Runner::Shell { shell: shell.into() },
    }
}

fn interpreted(languages: &[&str], interpreter: &str, file_name: &str, template: Option<&str>) -> RunnerConfig {
    RunnerConfig {
        languages: languages.iter().map(|l| l.to_string()).collect(),
        image: None,
        runner: Runner::Interpreted {
            interpreter: interpreter.into(),
            file_name: file_name.into(),
            template: template.map(str::to_string),
        },
    }
}

fn compiled(languages: &[&str], compiler: &str, file_name: &str) -> RunnerConfig {
    RunnerConfig {
        languages: languages.iter().map(|l| l.to_string()).collect(),
        image: None,
        runner: Runner::Compiled {
            compiler: compiler.into(),
            output_flag: default_output_flag(),
            file_name: file_name.into(),
        },
    }
}

pub fn builtin_runners() -> Vec<RunnerConfig> {
    vec![
        shell(&["sh"], "sh"),
        shell(&["bash"], "bash"),
        shell(&["zsh"], "zsh"),
        interpreted(&["python", "py"], "python3", "main.py", None),
        interpreted(&["lua"], "lua", "main.lua", None),
        interpreted(&["javascript", "js"], "deno run", "main.js", None),
        interpreted(&["typescript", "ts"], "deno run", "main.ts", None),
        interpreted(&["java"], "java", "main.java", None),
        interpreted(&["go"], "go run", "main.go", Some(GO_TEMPLATE)),
        compiled(&["c"], "gcc", "main.c"),
        compiled(&["cpp", "c++"], "g++", "main.cpp"),
        compiled(&["rust"], "rustc", "main.rs"),
        compiled(&["haskell"], "ghc", "main.hs"),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to {action}: {source}")]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`DOCKER=true` needs an `IMAGE` for language `{0}`")]
    MissingImage(String),
    #[error("malformed container working directory `{0}`")]
    MalformedContainer(String),
    #[error("runner for `{0}` has an empty command")]
    EmptyCommand(String),
    #[error("runner command `{command}` for `{language}` has unbalanced quotes")]
    UnbalancedQuotes { language: String, command: String },
    #[error("cannot quote the command line for `{language}`: {message}")]
    Quote { language: String, message: String },
}

impl RunnerError {
    fn io(action: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { action: action.into(), source }
    }
}

/// Split a configured command into shell words.
fn split_words(command: &str, language: &str) -> Result<Vec<String>, RunnerError> {
    let words = shlex::split(command).ok_or_else(|| RunnerError::UnbalancedQuotes {
        language: language.to_string(),
        command: command.to_string(),
    })?;
    if words.is_empty() {
        return Err(RunnerError::EmptyCommand(language.to_string()));
    }
    Ok(words)
}

/// Settings shared by every runner invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub container_runtime: String,
    pub home_dir: Option<PathBuf>,
}

impl RunContext {
    pub fn new(container_runtime: impl Into<String>) -> Self {
        Self { container_runtime: container_runtime.into(), home_dir: dirs::home_dir() }
    }

    /// Expand a leading `~` to the home directory.
    pub fn expand_dir(&self, dir: &str) -> PathBuf {
        match (dir.strip_prefix('~'), &self.home_dir) {
            (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
                home.join(rest.trim_start_matches('/'))
            }
            _ => PathBuf::from(dir),
        }
    }
}

/// The options and environment of one run.
pub struct RunInput<'a> {
    pub language: &'a str,
    pub text: &'a str,
    pub opts: &'a BTreeMap<String, String>,
    pub env: &'a BTreeMap<String, String>,
}

impl RunInput<'_> {
    fn opt(&self, key: &str) -> Option<&str> {
        self.opts.get(key).map(String::as_str).filter(|value| !value.is_empty())
    }

    fn working_dir(&self, ctx: &RunContext) -> Option<PathBuf> {
        self.opt(OPT_CWD).filter(|cwd| !cwd.starts_with(DOCKER_CWD_PREFIX)).map(|cwd| ctx.expand_dir(cwd))
    }

    fn docker_container(&self) -> Option<&str> {
        self.opt(OPT_CWD).and_then(|cwd| cwd.strip_prefix(DOCKER_CWD_PREFIX))
    }

    fn full_file(&self) -> bool {
        self.opt(OPT_FULL_FILE) == Some("true")
    }
}

impl RunnerEntry {
    /// Build the command for one run of a block.
    pub fn create_command(&self, input: &RunInput<'_>, ctx: &RunContext) -> Result<PreparedCommand, RunnerError> {
        if let Runner::Shell { shell } = &self.runner {
            if let Some(container) = input.docker_container() {
                return shell::exec_in_container(shell, container, input, ctx);
            }
        }

        let image = input.opt(OPT_IMAGE).map(str::to_string).or_else(|| self.image.clone());
        let forced = input.opt(OPT_DOCKER) == Some("true");
        if forced && image.is_none() {
            return Err(RunnerError::MissingImage(input.language.to_string()));
        }

        let command = match &self.runner {
            Runner::Shell { shell } => shell::create_command(shell, input, ctx)?,
            Runner::Interpreted { interpreter, file_name, template } => {
                interpreted::create_command(interpreter, file_name, template.as_deref(), input)?
            }
            Runner::Compiled { compiler, output_flag, file_name } => {
                compiled::create_command(compiler, output_flag, file_name, input)?
            }
        };

        match image {
            Some(image) => container::wrap_in_image(command, &image, ctx),
            None => Ok(command),
        }
    }
}

fn scratch_dir(language: &str) -> Result<TempDir, RunnerError> {
    tempfile::Builder::new()
        .prefix(&format!("fencerun_{language}_"))
        .tempdir()
        .map_err(|error| RunnerError::io("create scratch directory", error))
}

fn write_source(dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf, RunnerError> {
    let path = dir.join(file_name);
    std::fs::write(&path, contents).map_err(|error| RunnerError::io(format!("write {}", path.display()), error))?;
    Ok(path)
}
