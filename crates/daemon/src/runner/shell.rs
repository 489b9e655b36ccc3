use super::{scratch_dir, write_source, PreparedCommand, RunContext, RunInput, RunnerError};

const SCRIPT_NAME: &str = "script.sh";

/// `<shell> <scratch>/script.sh`, run from `CWD` when given.
pub(super) fn create_command(
    shell: &str,
    input: &RunInput<'_>,
    ctx: &RunContext,
) -> Result<PreparedCommand, RunnerError> {
    let scratch = scratch_dir(input.language)?;
    let script = write_source(scratch.path(), SCRIPT_NAME, input.text)?;

    Ok(PreparedCommand {
        program: shell.to_string(),
        args: vec![script.display().to_string()],
        working_dir: input.working_dir(ctx),
        env: input.env.clone(),
        scratch: Some(scratch),
    })
}

/// `<runtime> exec -i [-e K=V].. <container> <shell> -c <body>` for `CWD=docker:<container>`.
///
/// The container may name an env binding holding the real container name.
pub(super) fn exec_in_container(
    shell: &str,
    container: &str,
    input: &RunInput<'_>,
    ctx: &RunContext,
) -> Result<PreparedCommand, RunnerError> {
    let container = container.trim();
    if container.is_empty() {
        return Err(RunnerError::MalformedContainer(container.to_string()));
    }
    let container = input
        .env
        .get(container)
        .filter(|resolved| !resolved.is_empty())
        .map(String::as_str)
        .unwrap_or(container);

    let mut args = vec!["exec".to_string(), "-i".to_string()];
    for (key, value) in input.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.extend([container.to_string(), shell.to_string(), "-c".to_string(), input.text.to_string()]);

    Ok(PreparedCommand {
        program: ctx.container_runtime.clone(),
        args,
        working_dir: None,
        env: input.env.clone(),
        scratch: None,
    })
}
