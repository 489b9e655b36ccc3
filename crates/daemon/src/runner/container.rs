use std::path::Path;

use super::{PreparedCommand, RunContext, RunnerError};

/// Mount point of the scratch directory inside the container.
pub const CONTAINER_WORKDIR: &str = "/work";

/// Run `command` inside a throwaway container of `image`.
///
/// The scratch directory is mounted at `/work`; arguments pointing into it are
/// rewritten to their in-container paths.
pub(super) fn wrap_in_image(
    command: PreparedCommand,
    image: &str,
    ctx: &RunContext,
) -> Result<PreparedCommand, RunnerError> {
    let mut args = vec!["run".to_string(), "--rm".to_string(), "-i".to_string()];

    let scratch_path = command.scratch.as_ref().map(|dir| dir.path().to_path_buf());
    if let Some(scratch) = &scratch_path {
        args.push("-v".to_string());
        args.push(format!("{}:{CONTAINER_WORKDIR}", scratch.display()));
        args.push("-w".to_string());
        args.push(CONTAINER_WORKDIR.to_string());
    }

    for (key, value) in &command.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push(image.to_string());
    args.push(command.program.clone());
    args.extend(command.args.iter().map(|arg| in_container(arg, scratch_path.as_deref())));

    Ok(PreparedCommand {
        program: ctx.container_runtime.clone(),
        args,
        working_dir: None,
        env: command.env,
        scratch: command.scratch,
    })
}

fn in_container(arg: &str, scratch: Option<&Path>) -> String {
    let Some(scratch) = scratch else {
        return arg.to_string();
    };
    match Path::new(arg).strip_prefix(scratch) {
        Ok(relative) => Path::new(CONTAINER_WORKDIR).join(relative).display().to_string(),
        Err(_) => arg.to_string(),
    }
}
