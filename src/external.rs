//! Running external programs (quality scorers, binarization models).
//!
//! Both the Python scoring helper and `sbb_binarize` are invoked once per
//! image with an argument template. Placeholders of the form `{name}` in an
//! argument are replaced before the call; every call runs under a timeout and
//! the child is killed if the timeout fires.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Why an external call did not produce output.
#[derive(Debug)]
pub(crate) enum ExternalFailure {
    /// The program could not be started.
    Spawn(String),
    /// The program exceeded its time limit and was killed.
    Timeout,
    /// The program exited unsuccessfully.
    Exit { status: String, stderr: String },
}

impl std::fmt::Display for ExternalFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalFailure::Spawn(e) => write!(f, "cannot start program: {e}"),
            ExternalFailure::Timeout => f.write_str("timed out"),
            ExternalFailure::Exit { status, stderr } if stderr.is_empty() => {
                write!(f, "exited with {status}")
            }
            ExternalFailure::Exit { status, stderr } => {
                write!(f, "exited with {status}: {stderr}")
            }
        }
    }
}

/// Replace every `{key}` in `args` with its value.
pub(crate) fn expand_args(args: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), value)
            })
        })
        .collect()
}

/// Run `program args…`, returning stdout on success.
pub(crate) async fn run(
    program: &Path,
    args: &[String],
    timeout: Duration,
) -> Result<String, ExternalFailure> {
    debug!("Running {} {}", program.display(), args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExternalFailure::Spawn(e.to_string()))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ExternalFailure::Spawn(e.to_string()))?,
        Err(_) => return Err(ExternalFailure::Timeout),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExternalFailure::Exit {
            status: output.status.to_string(),
            stderr: last_line(&stderr).to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Python tracebacks end with the useful line.
fn last_line(s: &str) -> &str {
    s.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}
