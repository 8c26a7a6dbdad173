use log::trace;
use std::process::Command;

use crate::utils::error::{AppError, AppResult};

/// Run a host command to completion and return its stdout.
///
/// Spawn failures and non-zero exit codes both become `CommandError`, with the
/// full command line and stderr in the message.
pub fn run(program: &str, args: &[&str]) -> AppResult<String> {
    let command_line = format_command(program, args);
    trace!("Executing: {}", command_line);

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| AppError::CommandError(format!("{}: spawn failed: {}", command_line, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::CommandError(format!(
            "{}: exited with {}: {}",
            command_line,
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Render a command line for logs and error messages
pub fn format_command(program: &str, args: &[&str]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_command_line() {
        assert_eq!(
            format_command("tc", &["qdisc", "add", "dev", "eth0", "ingress"]),
            "tc qdisc add dev eth0 ingress"
        );
    }

    #[test]
    fn missing_program_is_a_command_error() {
        let err = run("definitely-not-a-real-binary-3f9a", &["--version"]).unwrap_err();
        assert!(matches!(err, AppError::CommandError(_)));
    }

    #[test]
    fn captures_stdout() {
        let out = run("echo", &["hello"]).unwrap();
        assert_eq!(out.trim(), "hello");
    }
}
