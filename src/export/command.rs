use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{ExportError, ExportRequest, Exporter};

pub const DEFAULT_PROGRAM: &str = "yolo";
pub const DEFAULT_ARGS: [&str; 4] = [
    "export",
    "model={weights}",
    "format={format}",
    "imgsz={imgsz}",
];
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STDERR_TAIL_LINES: usize = 20;

/// Runs an external export command. Arguments may contain `{weights}`,
/// `{stem}`, `{format}` and `{imgsz}` placeholders.
#[derive(Debug, Clone)]
pub struct CommandExporter {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for CommandExporter {
    fn default() -> Self {
        Self::new(
            DEFAULT_PROGRAM,
            DEFAULT_ARGS.iter().map(|arg| arg.to_string()).collect(),
            DEFAULT_TIMEOUT,
        )
    }
}

impl CommandExporter {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn expand_args(&self, request: &ExportRequest, weights: &str) -> Vec<String> {
        let stem = request.weights_stem();
        let imgsz = request.image_size.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{weights}", weights)
                    .replace("{stem}", &stem)
                    .replace("{format}", &request.format)
                    .replace("{imgsz}", &imgsz)
            })
            .collect()
    }
}

impl Exporter for CommandExporter {
    fn export(&self, request: &ExportRequest) -> Result<(), ExportError> {
        if !request.weights.is_file() {
            return Err(ExportError::MissingWeights(request.weights.clone()));
        }
        // The child runs in `work_dir`, so hand it an absolute path.
        let weights = std::fs::canonicalize(&request.weights)
            .unwrap_or_else(|_| request.weights.clone());
        let args = self.expand_args(request, &weights.to_string_lossy());

        info!(
            "exporting {} to {} (imgsz {})",
            weights.display(),
            request.format,
            request.image_size
        );
        debug!("running {:?} {:?}", self.program, args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExportError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr = child.stderr.take().map(|pipe| {
            thread::spawn(move || {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                for line in BufReader::new(pipe).lines().map_while(Result::ok) {
                    debug!("exporter: {line}");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Vec::from(tail).join("\n")
            })
        });

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(ExportError::Wait)? {
                break status;
            }

            if start.elapsed() > self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExportError::TimedOut {
                    timeout: self.timeout,
                });
            }

            thread::sleep(POLL_INTERVAL);
        };

        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(ExportError::Failed {
                status: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        info!("export finished in {:.1?}", start.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str, timeout: Duration) -> CommandExporter {
        CommandExporter::new("/bin/sh", vec!["-c".into(), script.into()], timeout)
    }

    fn weights_in(dir: &std::path::Path) -> ExportRequest {
        let weights = dir.join("model.pt");
        std::fs::write(&weights, b"pt").unwrap();
        ExportRequest::new(weights, dir)
    }

    #[test]
    fn default_args_expand_placeholders() {
        let exporter = CommandExporter::default();
        let request = ExportRequest::new("/work/best.pt", "/work").with_image_size(320);
        assert_eq!(
            exporter.expand_args(&request, "/work/best.pt"),
            vec!["export", "model=/work/best.pt", "format=tflite", "imgsz=320"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn command_runs_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = shell(
            "mkdir -p {stem}_saved_model && cp {weights} {stem}_saved_model/{stem}_float32.{format}",
            DEFAULT_TIMEOUT,
        );
        exporter.export(&weights_in(dir.path())).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("model_saved_model/model_float32.tflite")).unwrap(),
            b"pt"
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_status_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let error = shell("echo boom >&2; exit 3", DEFAULT_TIMEOUT)
            .export(&weights_in(dir.path()))
            .unwrap_err();
        match error {
            ExportError::Failed { status, stderr } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let error = shell("sleep 5", Duration::from_millis(200))
            .export(&weights_in(dir.path()))
            .unwrap_err();
        assert!(matches!(error, ExportError::TimedOut { .. }), "{error:?}");
    }

    #[test]
    fn missing_binary_errors() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CommandExporter::new(
            "/definitely/missing/exporter",
            Vec::new(),
            DEFAULT_TIMEOUT,
        );
        let error = exporter.export(&weights_in(dir.path())).unwrap_err();
        assert!(matches!(error, ExportError::Spawn { .. }), "{error:?}");
    }

    #[test]
    fn missing_weights_are_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let request = ExportRequest::new(dir.path().join("absent.pt"), dir.path());
        let error = CommandExporter::default().export(&request).unwrap_err();
        assert!(matches!(error, ExportError::MissingWeights(_)));
    }
}
