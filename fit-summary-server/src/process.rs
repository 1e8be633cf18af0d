use std::ffi::OsString;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::AppError;

/// How the external processor is invoked.
///
/// The call is `<program> [<script>] --i <input> --o <output dir>`.
#[derive(Debug, Clone)]
pub struct Processor {
    pub program: OsString,
    pub script: Option<OsString>,
    pub timeout: Duration,
}

impl Processor {
    pub fn command(&self, input: &Path, output_dir: &Path) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(script) = &self.script {
            command.arg(script);
        }
        command
            .arg("--i")
            .arg(input)
            .arg("--o")
            .arg(output_dir)
            .kill_on_drop(true);
        command
    }

    /// Runs the processor on `input` and waits for it, at most [`Processor::timeout`].
    ///
    /// Returns the captured stdout followed by stderr. A run that does not
    /// finish in time is killed.
    pub async fn run(&self, id: u64, input: &Path, output_dir: &Path) -> Result<String, AppError> {
        let mut command = self.command(input, output_dir);
        log::debug!(id; "command: {:?}", command.as_std());

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, command.output()).await;
        let time_taken = start.elapsed();

        // Dropping the output future kills the child.
        let Ok(result) = result else {
            log::warn!(id; "processor timed out after {time_taken:?}");
            return Err(AppError::Timeout(self.timeout));
        };
        let out = result.map_err(|e| {
            log::info!(id; "Failed: {e:?}");
            AppError::Spawn(e)
        })?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        log::debug!(id; "Status: {} after {time_taken:?}", out.status);
        log::debug!(id; "Output: {}", output.trim());

        if out.status.success() {
            Ok(output)
        } else {
            Err(AppError::ProcessorFailed {
                // Terminated by a signal
                code: out.status.code().unwrap_or(-1001),
                output,
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn processor(program: &str, script: &str) -> Processor {
        Processor {
            program: program.into(),
            script: Some(script.into()),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn flag_convention() {
        let command = processor("python", "fit_processor.py")
            .command(Path::new("uploads/ride.fit"), Path::new("processed"));
        let std = command.as_std();
        assert_eq!(std.get_program(), "python");
        let args: Vec<_> = std.get_args().collect();
        assert_eq!(
            args,
            ["fit_processor.py", "--i", "uploads/ride.fit", "--o", "processed"]
        );
    }

    #[test]
    fn script_is_optional() {
        let mut processor = processor("summarize", "");
        processor.script = None;
        let command = processor.command(Path::new("in.fit"), Path::new("out"));
        let args: Vec<_> = command.as_std().get_args().collect();
        assert_eq!(args, ["--i", "in.fit", "--o", "out"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn success_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ok.sh");
        std::fs::write(&script, "echo \"in=$2 out=$4\"\necho warn >&2\n").unwrap();

        let output = processor("sh", script.to_str().unwrap())
            .run(1, Path::new("ride.fit"), Path::new("processed"))
            .await
            .unwrap();
        assert_eq!(output, "in=ride.fit out=processed\nwarn\n");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn non_zero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fail.sh");
        std::fs::write(&script, "echo boom >&2\nexit 3\n").unwrap();

        let e = processor("sh", script.to_str().unwrap())
            .run(2, Path::new("ride.fit"), Path::new("processed"))
            .await
            .unwrap_err();
        match e {
            AppError::ProcessorFailed { code, output } => {
                assert_eq!(code, 3);
                assert_eq!(output, "boom\n");
            }
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_program_fails_to_spawn() {
        let e = processor("/nonexistent/fit-processor", "x.py")
            .run(3, Path::new("ride.fit"), Path::new("processed"))
            .await
            .unwrap_err();
        assert!(matches!(e, AppError::Spawn(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn hung_processor_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hang.sh");
        std::fs::write(&script, "sleep 30\n").unwrap();
        let mut processor = processor("sh", script.to_str().unwrap());
        processor.timeout = Duration::from_millis(200);

        let start = Instant::now();
        let e = processor
            .run(4, Path::new("ride.fit"), Path::new("processed"))
            .await
            .unwrap_err();
        assert!(matches!(e, AppError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
