use super::{scratch_dir, split_words, write_source, PreparedCommand, RunInput, RunnerError};

const BINARY_NAME: &str = "main";

/// `sh -c "<compiler> <flag> main <file> && ./main"` inside the scratch directory,
/// so compiler diagnostics stream like program output.
pub(super) fn create_command(
    compiler: &str,
    output_flag: &str,
    file_name: &str,
    input: &RunInput<'_>,
) -> Result<PreparedCommand, RunnerError> {
    let mut words = split_words(compiler, input.language)?;
    words.extend([output_flag.to_string(), BINARY_NAME.to_string(), file_name.to_string()]);
    let compile = shlex::try_join(words.iter().map(String::as_str))
        .map_err(|error| RunnerError::Quote { language: input.language.to_string(), message: error.to_string() })?;

    let scratch = scratch_dir(input.language)?;
    write_source(scratch.path(), file_name, input.text)?;

    let script = format!("{compile} && ./{BINARY_NAME}");

    Ok(PreparedCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script],
        working_dir: Some(scratch.path().to_path_buf()),
        env: input.env.clone(),
        scratch: Some(scratch),
    })
}
