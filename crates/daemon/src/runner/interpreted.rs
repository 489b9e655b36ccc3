use super::{scratch_dir, split_words, write_source, PreparedCommand, RunInput, RunnerError, CODE_PLACEHOLDER};

/// `<interpreter..> ./<file_name>` inside the scratch directory.
///
/// A `template` wraps the body at `{{code}}` unless the block sets `FULL_FILE=true`.
pub(super) fn create_command(
    interpreter: &str,
    file_name: &str,
    template: Option<&str>,
    input: &RunInput<'_>,
) -> Result<PreparedCommand, RunnerError> {
    let mut words = split_words(interpreter, input.language)?.into_iter();
    let program = words.next().ok_or_else(|| RunnerError::EmptyCommand(input.language.to_string()))?;

    let source = match template {
        Some(template) if !input.full_file() => template.replace(CODE_PLACEHOLDER, input.text),
        _ => input.text.to_string(),
    };

    let scratch = scratch_dir(input.language)?;
    write_source(scratch.path(), file_name, &source)?;

    let mut args: Vec<String> = words.collect();
    args.push(format!("./{file_name}"));

    Ok(PreparedCommand {
        program,
        args,
        working_dir: Some(scratch.path().to_path_buf()),
        env: input.env.clone(),
        scratch: Some(scratch),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::runner::{RunContext, RunnerTable};

    fn run(language: &str, text: &str, opts: &[(&str, &str)]) -> PreparedCommand {
        let opts: BTreeMap<String, String> = opts.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let env = BTreeMap::new();
        let input = RunInput { language, text, opts: &opts, env: &env };
        RunnerTable::builtin()
            .resolve(language)
            .expect("runner")
            .create_command(&input, &RunContext::new("docker"))
            .expect("command")
    }

    fn written(command: &PreparedCommand, file_name: &str) -> String {
        let dir = command.scratch.as_ref().expect("scratch").path();
        std::fs::read_to_string(dir.join(file_name)).expect("source file")
    }

    #[test]
    fn splits_interpreter_and_runs_file_from_scratch_dir() {
        let command = run("ts", "console.log(1)\n", &[]);

        assert_eq!(command.program, "deno");
        assert_eq!(command.args, vec!["run", "./main.ts"]);
        assert_eq!(command.working_dir.as_deref(), command.scratch.as_ref().map(|dir| dir.path()));
        assert_eq!(written(&command, "main.ts"), "console.log(1)\n");
    }

    #[test]
    fn go_body_is_wrapped_in_main_unless_full_file() {
        let wrapped = run("go", "println(1)\n", &[]);
        let source = written(&wrapped, "main.go");
        assert!(source.starts_with("package main\n"));
        assert!(source.contains("func main() {\nprintln(1)\n"));

        let full = run("go", "package main\n", &[("FULL_FILE", "true")]);
        assert_eq!(written(&full, "main.go"), "package main\n");
    }

    fn custom(interpreter: &str) -> Result<PreparedCommand, RunnerError> {
        let opts = BTreeMap::new();
        let env = BTreeMap::new();
        let input = RunInput { language: "x", text: "body\n", opts: &opts, env: &env };
        create_command(interpreter, "main.sh", None, &input)
    }

    #[test]
    fn quoted_interpreter_words_stay_together() {
        let command = custom(r#"sh -c 'cat "$0"'"#).expect("command");

        assert_eq!(command.program, "sh");
        assert_eq!(command.args, vec!["-c", r#"cat "$0""#, "./main.sh"]);
        assert_eq!(command.display(), r#"sh -c 'cat "$0"' ./main.sh"#);
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        let error = custom("python3 'unterminated").unwrap_err();
        assert!(matches!(error, RunnerError::UnbalancedQuotes { ref language, .. } if language == "x"));
    }
}
