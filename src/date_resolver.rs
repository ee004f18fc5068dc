//! Content date lookup for date-bucketed categories.
//!
//! [`DateResolver`] is the seam between the copy engine and whatever reads
//! dates out of files. [`ExifTool`] keeps one `exiftool -stay_open` process
//! per run and reads the `CreateDate` tag through it; [`NoDates`] is used when
//! no resolver is available.

use crate::config::DateBucketMode;
use chrono::{Datelike, NaiveDateTime};
use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Format of EXIF date tags, e.g. `2022:12:08 19:09:53`.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
/// Line `exiftool -stay_open` prints after the output of each request.
const READY_MARKER: &str = "{ready}";

#[derive(Debug, Error)]
pub enum DateError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Tool {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited unexpectedly")]
    Exited { program: String },

    #[error("unparseable date '{value}': {source}")]
    Parse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Resolves the date bucket of a file.
///
/// `Ok(None)` means the file carries no usable date; the file is then copied
/// without a bucket. Errors are treated the same way by the caller, but are
/// logged as warnings.
pub trait DateResolver: Send + Sync {
    fn resolve(&self, path: &Path, mode: DateBucketMode) -> Result<Option<String>, DateError>;
}

/// Resolver that never finds a date.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDates;

impl DateResolver for NoDates {
    fn resolve(&self, _path: &Path, _mode: DateBucketMode) -> Result<Option<String>, DateError> {
        Ok(None)
    }
}

/// Renders the bucket path segment for a date: `YYYY` or `YYYY/MM`.
pub fn bucket_for(date: &NaiveDateTime, mode: DateBucketMode) -> String {
    match mode {
        DateBucketMode::Year => format!("{:04}", date.year()),
        DateBucketMode::Month => format!("{:04}/{:02}", date.year(), date.month()),
    }
}

/// Parses an EXIF date tag value.
pub fn parse_exif_datetime(value: &str) -> Result<NaiveDateTime, DateError> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, EXIF_DATETIME_FORMAT).map_err(|source| {
        DateError::Parse {
            value: value.to_string(),
            source,
        }
    })
}

/// Reads `CreateDate` through the external `exiftool` program.
///
/// The program is started once with `-stay_open True -@ -` and fed one request
/// per file over stdin. Requests are serialized. A session that times out or
/// dies is discarded and the next lookup starts a fresh one.
#[derive(Debug)]
pub struct ExifTool {
    program: PathBuf,
    leading_args: Vec<OsString>,
    timeout: Duration,
    session: Mutex<Option<Session>>,
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new("exiftool")
    }
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            session: Mutex::new(None),
        }
    }

    /// Arguments placed before every exiftool argument, for running the
    /// tool through a wrapper.
    #[cfg(test)]
    fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks that the program can be run at all.
    pub fn check_available(&self) -> Result<(), DateError> {
        self.run(&[OsStr::new("-ver")]).map(|_| ())
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    fn run(&self, args: &[&OsStr]) -> Result<String, DateError> {
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DateError::Spawn {
                program: self.program_name(),
                source,
            })?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(DateError::Timeout {
                        program: self.program_name(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(DateError::Spawn {
                        program: self.program_name(),
                        source,
                    });
                }
            }
        };

        // The tag output is a single short line, well below the pipe buffer,
        // so reading after exit cannot deadlock.
        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_string(&mut stdout);
        }
        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                let _ = err.read_to_string(&mut stderr);
            }
            return Err(DateError::Tool {
                program: self.program_name(),
                status,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }

    /// `-s3 -CreateDate <path>` through the running session.
    fn query(&self, path: &Path) -> Result<String, DateError> {
        // The request format is line based; other paths take the slow route.
        let Some(path_line) = request_line(path) else {
            debug!(path = %path.display(), "path not expressible as a request line");
            return self.run(&[OsStr::new("-s3"), OsStr::new("-CreateDate"), path.as_os_str()]);
        };

        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let mut session = match slot.take() {
            Some(session) => session,
            None => self.start_session()?,
        };
        let output = session.execute(&path_line, &self.program_name(), self.timeout)?;
        *slot = Some(session);
        Ok(output)
    }

    fn start_session(&self) -> Result<Session, DateError> {
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(["-stay_open", "True", "-@", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| DateError::Spawn {
                program: self.program_name(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DateError::Exited {
                program: self.program_name(),
            });
        };

        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).split(b'\n') {
                let Ok(line) = line else { break };
                if tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
                    break;
                }
            }
        });

        debug!(program = %self.program.display(), "exiftool session started");
        Ok(Session {
            child,
            stdin,
            lines,
        })
    }
}

impl DateResolver for ExifTool {
    fn resolve(&self, path: &Path, mode: DateBucketMode) -> Result<Option<String>, DateError> {
        let output = self.query(path)?;
        let value = output.trim();
        if value.is_empty() {
            return Ok(None);
        }
        let date = parse_exif_datetime(value)?;
        Ok(Some(bucket_for(&date, mode)))
    }
}

/// A running `exiftool -stay_open` process.
#[derive(Debug)]
struct Session {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
}

impl Session {
    /// Sends one request and collects its output up to the ready marker.
    fn execute(
        &mut self,
        path_line: &[u8],
        program: &str,
        timeout: Duration,
    ) -> Result<String, DateError> {
        let mut request = b"-s3\n-CreateDate\n".to_vec();
        request.extend_from_slice(path_line);
        request.extend_from_slice(b"\n-execute\n");
        let exited = || DateError::Exited {
            program: program.to_string(),
        };
        self.stdin
            .write_all(&request)
            .and_then(|()| self.stdin.flush())
            .map_err(|_| exited())?;

        let deadline = Instant::now() + timeout;
        let mut output = String::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) if line.trim_end() == READY_MARKER => return Ok(output),
                Ok(line) => {
                    output.push_str(&line);
                    output.push('\n');
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(DateError::Timeout {
                        program: program.to_string(),
                        timeout,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(exited()),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.stdin.write_all(b"-stay_open\nFalse\n");
        let _ = self.stdin.flush();
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                _ => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// The path as one line of an exiftool argument file.
#[cfg(unix)]
fn request_line(path: &Path) -> Option<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    let bytes = path.as_os_str().as_bytes();
    (!bytes.contains(&b'\n')).then(|| bytes.to_vec())
}

#[cfg(not(unix))]
fn request_line(path: &Path) -> Option<Vec<u8>> {
    path.to_str()
        .filter(|s| !s.contains('\n'))
        .map(|s| s.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exif_datetime() {
        let date = parse_exif_datetime("2022:12:08 19:09:53\n").unwrap();
        assert_eq!(bucket_for(&date, DateBucketMode::Month), "2022/12");
        assert_eq!(bucket_for(&date, DateBucketMode::Year), "2022");
    }

    #[test]
    fn test_single_digit_month_is_padded() {
        let date = parse_exif_datetime("2019:03:01 00:00:00").unwrap();
        assert_eq!(bucket_for(&date, DateBucketMode::Month), "2019/03");
    }

    #[test]
    fn test_invalid_exif_datetime() {
        assert!(matches!(
            parse_exif_datetime("0000:00:00 00:00:00"),
            Err(DateError::Parse { .. })
        ));
        assert!(parse_exif_datetime("yesterday").is_err());
    }

    #[test]
    fn test_no_dates_never_finds_a_date() {
        let resolver = NoDates;
        assert_eq!(
            resolver
                .resolve(Path::new("photo.jpg"), DateBucketMode::Year)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_missing_program_is_a_spawn_error() {
        let tool = ExifTool::new("sortcopy-no-such-exiftool-binary");
        assert!(matches!(tool.check_available(), Err(DateError::Spawn { .. })));
        assert!(matches!(
            tool.resolve(Path::new("photo.jpg"), DateBucketMode::Month),
            Err(DateError::Spawn { .. })
        ));
    }

    /// Answers every request with the next month of 2021.
    #[cfg(unix)]
    const COUNTING_TOOL: &str = r#"
n=0
while IFS= read -r line; do
    case "$line" in
        -execute) n=$((n+1)); printf '2021:%02d:01 00:00:00\n{ready}\n' "$n" ;;
        False) exit 0 ;;
    esac
done
"#;

    #[cfg(unix)]
    fn scripted(script: &str) -> ExifTool {
        ExifTool::new("sh").with_leading_args(["-c", script, "exiftool"])
    }

    #[cfg(unix)]
    #[test]
    fn test_session_is_reused_across_lookups() {
        let tool = scripted(COUNTING_TOOL);
        let photo = Path::new("/photos/a.jpg");
        assert_eq!(
            tool.resolve(photo, DateBucketMode::Month).unwrap().as_deref(),
            Some("2021/01")
        );
        assert_eq!(
            tool.resolve(photo, DateBucketMode::Month).unwrap().as_deref(),
            Some("2021/02")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_answer_is_no_date() {
        let tool = scripted(
            r#"while IFS= read -r line; do
                case "$line" in -execute) echo '{ready}' ;; False) exit 0 ;; esac
            done"#,
        );
        assert_eq!(
            tool.resolve(Path::new("/photos/a.jpg"), DateBucketMode::Year).unwrap(),
            None
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_session_times_out() {
        let tool = scripted("while IFS= read -r line; do :; done")
            .with_timeout(Duration::from_millis(200));
        assert!(matches!(
            tool.resolve(Path::new("/photos/a.jpg"), DateBucketMode::Year),
            Err(DateError::Timeout { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_session_is_replaced() {
        let tool = scripted(
            r#"while IFS= read -r line; do
                case "$line" in -execute) printf '2020:05:01 00:00:00\n{ready}\n'; exit 0 ;; esac
            done"#,
        );
        let photo = Path::new("/photos/a.jpg");
        assert_eq!(
            tool.resolve(photo, DateBucketMode::Year).unwrap().as_deref(),
            Some("2020")
        );
        assert!(matches!(
            tool.resolve(photo, DateBucketMode::Year),
            Err(DateError::Exited { .. })
        ));
        assert_eq!(
            tool.resolve(photo, DateBucketMode::Year).unwrap().as_deref(),
            Some("2020")
        );
    }
}
