//! Build driver: interactive menuconfig, `make clean`, and the timed
//! `make` compile that produces a firmware artifact.

use std::process::Stdio;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::process::Command;

use crate::error::BuildError;
use crate::types::BuildResult;

/// Hard ceiling on a single `make` invocation.
const COMPILE_TIMEOUT: Duration = Duration::from_secs(300);
/// Output is captured in full but truncated to this many lines before
/// being stored on [`BuildResult`], to keep failure reports readable.
const TAIL_TRUNCATE_LINES: usize = 4096;
/// Number of trailing lines surfaced directly in the failure summary.
const TAIL_SURFACE_LINES: usize = 20;

/// Launches the board's interactive `make menuconfig` with inherited
/// stdio and no timeout; the user drives it directly.
pub async fn edit_config(build_dir: &Utf8Path) -> Result<(), BuildError> {
    let status = Command::new("make")
        .arg("menuconfig")
        .current_dir(build_dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|_| BuildError::EditorFailed)?;

    if status.success() {
        Ok(())
    } else {
        Err(BuildError::EditorFailed)
    }
}

/// Runs `make clean`, quietly unless `verbose`.
pub async fn clean(build_dir: &Utf8Path, verbose: bool) -> Result<(), BuildError> {
    let output = Command::new("make")
        .arg("clean")
        .current_dir(build_dir)
        .stdout(capture_stdio(verbose))
        .stderr(capture_stdio(verbose))
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|_| BuildError::CleanFailed)?;

    if output.status.success() {
        Ok(())
    } else {
        Err(BuildError::CleanFailed)
    }
}

fn capture_stdio(verbose: bool) -> Stdio {
    if verbose {
        Stdio::inherit()
    } else {
        Stdio::piped()
    }
}

/// Runs `make`, enforcing [`COMPILE_TIMEOUT`], and locates the produced
/// firmware artifact at `artifact_path` on success.
pub async fn compile(
    build_dir: &Utf8Path,
    artifact_path: &Utf8Path,
    verbose: bool,
) -> Result<BuildResult, BuildError> {
    let start = Instant::now();

    let mut child = Command::new("make")
        .current_dir(build_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|_| BuildError::CompileFailed)?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let wait = async {
        let output = tokio::join!(
            read_to_string(stdout),
            read_to_string(stderr),
            wait_status(&mut child),
        );
        output
    };

    let (stdout_text, stderr_text, status) = match tokio::time::timeout(COMPILE_TIMEOUT, wait).await
    {
        Ok((stdout_text, stderr_text, status)) => (stdout_text, stderr_text, status),
        Err(_) => {
            let _ = child.kill().await;
            return Err(BuildError::CompileTimedOut(COMPILE_TIMEOUT));
        }
    };

    let elapsed_seconds = start.elapsed().as_secs_f64();
    let combined = format!("{stdout_text}{stderr_text}");
    let tail = truncate_tail(&combined, TAIL_TRUNCATE_LINES);

    if verbose {
        print!("{combined}");
    }

    let status = status.map_err(|_| BuildError::CompileFailed)?;
    if !status.success() {
        let surfaced = truncate_tail(&tail, TAIL_SURFACE_LINES);
        return Ok(BuildResult {
            success: false,
            firmware_path: None,
            firmware_size_bytes: None,
            elapsed_seconds,
            error_message: Some("compile failed".into()),
            error_output: Some(surfaced),
        });
    }

    let metadata = tokio::fs::metadata(artifact_path).await.map_err(|_| {
        BuildError::ArtifactNotProduced(artifact_path.to_string())
    })?;

    Ok(BuildResult {
        success: true,
        firmware_path: Some(artifact_path.to_owned()),
        firmware_size_bytes: Some(metadata.len()),
        elapsed_seconds,
        error_message: None,
        error_output: None,
    })
}

async fn read_to_string(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    use tokio::io::AsyncReadExt as _;
    let Some(mut pipe) = pipe else { return String::new() };
    let mut buf = String::new();
    let _ = pipe.read_to_string(&mut buf).await;
    buf
}

async fn wait_status(child: &mut tokio::process::Child) -> std::io::Result<std::process::ExitStatus> {
    child.wait().await
}

fn truncate_tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        text.to_string()
    } else {
        lines[lines.len() - max_lines..].join("\n")
    }
}

/// Path the compiled firmware artifact is expected at, mirroring Klipper's
/// own build layout.
pub fn expected_artifact_path(build_dir: &Utf8Path) -> Utf8PathBuf {
    build_dir.join("out").join("klipper.bin")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_tail_keeps_last_n_lines() {
        let text = (1..=10).map(|n| n.to_string()).collect::<Vec<_>>().join("\n");
        let tail = truncate_tail(&text, 3);
        assert_eq!(tail, "8\n9\n10");
    }

    #[test]
    fn truncate_tail_is_noop_under_limit() {
        let text = "a\nb\nc";
        assert_eq!(truncate_tail(text, 10), text);
    }

    #[tokio::test]
    async fn compile_reports_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("Makefile"), "all:\n\ttrue\n")
            .await
            .unwrap();
        let build_dir = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let artifact = build_dir.join("out").join("klipper.bin");
        let err = compile(&build_dir, &artifact, false).await.unwrap_err();
        assert!(matches!(err, BuildError::ArtifactNotProduced(_)));
    }
}
