//! External archiver invocation
//!
//! The archiver is run twice in a directory's life: once to list an archive's
//! contents (to tell whether it was already extracted) and once to extract it.
//! Both run with the working directory set to the archive's directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::types::Target;

/// Lists the files an archive would produce
#[async_trait]
pub trait ArchiveInspector: Send + Sync {
    /// Base names (or relative paths) of the entries in `archive`
    async fn list_contents(&self, archive: &Path) -> Result<Vec<String>>;

    /// Get the name of this inspector (for logging)
    fn name(&self) -> &'static str;
}

/// The `unrar` command-line tool
///
/// # Examples
///
/// ```no_run
/// use rar_hunter::CliArchiver;
/// use std::path::PathBuf;
///
/// // Explicit path
/// let archiver = CliArchiver::new(PathBuf::from("/usr/bin/unrar"));
///
/// // Or auto-discover from PATH
/// let archiver = CliArchiver::from_path().expect("unrar not found in PATH");
/// ```
#[derive(Clone, Debug)]
pub struct CliArchiver {
    binary_path: PathBuf,
    extract_args: Vec<String>,
    list_args: Vec<String>,
}

impl CliArchiver {
    /// Create an archiver for `binary_path` with the default arguments
    /// (`e -o-` to extract, `lb` to list)
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        let defaults = ToolsConfig::default();
        Self {
            binary_path: binary_path.into(),
            extract_args: defaults.extract_args,
            list_args: defaults.list_args,
        }
    }

    /// Attempt to find unrar in PATH
    ///
    /// Returns `None` if the binary is not found.
    pub fn from_path() -> Option<Self> {
        which::which("unrar").ok().map(Self::new)
    }

    /// Build from configuration, searching PATH when no explicit path is set
    ///
    /// # Errors
    ///
    /// [`Error::NotSupported`] if no binary can be located.
    pub fn from_config(tools: &ToolsConfig) -> Result<Self> {
        let binary_path = match &tools.unrar_path {
            Some(path) => path.clone(),
            None if tools.search_path => which::which("unrar").map_err(|_| {
                Error::NotSupported(
                    "unrar not found in PATH (set tools.unrar_path to configure it)".to_string(),
                )
            })?,
            None => {
                return Err(Error::NotSupported(
                    "no unrar path configured and PATH search is disabled".to_string(),
                ));
            }
        };

        Ok(Self {
            binary_path,
            extract_args: tools.extract_args.clone(),
            list_args: tools.list_args.clone(),
        })
    }

    /// Replace the arguments placed before the archive name when extracting
    pub fn with_extract_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extract_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the arguments placed before the archive name when listing
    pub fn with_list_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.list_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Path of the archiver binary
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Arguments placed before the archive name when extracting
    pub fn extract_args(&self) -> &[String] {
        &self.extract_args
    }

    /// Arguments placed before the archive name when listing
    pub fn list_args(&self) -> &[String] {
        &self.list_args
    }

    /// `<binary> <extract args...> <archive>` in the target's directory, both
    /// output streams piped, killed if the handle is dropped.
    pub(crate) fn extract_command(&self, target: &Target) -> Command {
        let mut command = Command::new(&self.binary_path);
        command
            .args(&self.extract_args)
            .arg(&target.archive)
            .current_dir(&target.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ArchiveInspector for CliArchiver {
    async fn list_contents(&self, archive: &Path) -> Result<Vec<String>> {
        let mut command = Command::new(&self.binary_path);
        command.args(&self.list_args);
        match (archive.parent(), archive.file_name()) {
            (Some(dir), Some(name)) if !dir.as_os_str().is_empty() => {
                command.arg(name).current_dir(dir);
            }
            _ => {
                command.arg(archive);
            }
        }

        let output = command
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::ExternalTool(format!(
                    "failed to execute {}: {}",
                    self.binary_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let detail = if output.stderr.is_empty() {
                &output.stdout
            } else {
                &output.stderr
            };
            return Err(Error::ExternalTool(format!(
                "listing {} failed ({}): {}",
                archive.display(),
                output.status,
                String::from_utf8_lossy(detail).trim()
            )));
        }

        Ok(parse_listing(&output.stdout))
    }

    fn name(&self) -> &'static str {
        "cli-unrar"
    }
}

/// One entry per non-blank line, surrounding whitespace removed
pub(crate) fn parse_listing(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_consistency_with_which_crate() {
        let which_result = which::which("unrar");
        let from_path_result = CliArchiver::from_path();
        assert_eq!(which_result.is_ok(), from_path_result.is_some());
        if let (Ok(expected), Some(archiver)) = (which_result, from_path_result) {
            assert_eq!(archiver.binary_path(), expected.as_path());
            assert_eq!(archiver.name(), "cli-unrar");
        }
    }

    #[test]
    fn test_from_config_prefers_explicit_path() {
        let tools = ToolsConfig {
            unrar_path: Some(PathBuf::from("/opt/rar/unrar")),
            search_path: false,
            extract_args: vec!["x".to_string()],
            list_args: vec!["lb".to_string()],
        };
        let archiver = CliArchiver::from_config(&tools).unwrap();
        assert_eq!(archiver.binary_path(), Path::new("/opt/rar/unrar"));
        assert_eq!(archiver.extract_args(), ["x"]);
    }

    #[test]
    fn test_from_config_without_path_or_search_is_not_supported() {
        let tools = ToolsConfig {
            unrar_path: None,
            search_path: false,
            ..ToolsConfig::default()
        };
        assert!(matches!(
            CliArchiver::from_config(&tools),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn test_extract_command_argv() {
        let archiver = CliArchiver::new("/usr/bin/unrar");
        let target = Target::new("show.part01.rar", "/data/show");
        let command = archiver.extract_command(&target);
        let std = command.as_std();

        assert_eq!(std.get_program(), "/usr/bin/unrar");
        let args: Vec<_> = std.get_args().collect();
        assert_eq!(args, ["e", "-o-", "show.part01.rar"]);
        assert_eq!(std.get_current_dir(), Some(Path::new("/data/show")));
    }

    #[test]
    fn test_parse_listing_trims_and_skips_blank_lines() {
        let names = parse_listing(b"movie.mkv\r\n\n   sample/movie-sample.mkv  \n");
        assert_eq!(names, vec!["movie.mkv", "sample/movie-sample.mkv"]);
        assert!(parse_listing(b"\n\n").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_contents_runs_in_archive_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("movie.rar"), b"").unwrap();

        // $0 is the archive argument; print it and one entry
        let archiver = CliArchiver::new("/bin/sh")
            .with_list_args(["-c", "test -f \"$0\" && echo \"  movie.mkv \""]);
        let names = archiver
            .list_contents(&dir.path().join("movie.rar"))
            .await
            .unwrap();
        assert_eq!(names, vec!["movie.mkv"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_contents_failure_carries_stderr() {
        let archiver =
            CliArchiver::new("/bin/sh").with_list_args(["-c", "echo 'bad header' >&2; exit 3"]);
        let err = archiver
            .list_contents(Path::new("/tmp/broken.rar"))
            .await
            .unwrap_err();
        match err {
            Error::ExternalTool(msg) => assert!(msg.contains("bad header"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_contents_missing_binary() {
        let archiver = CliArchiver::new("/nonexistent/unrar-xyz");
        let err = archiver
            .list_contents(Path::new("a.rar"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExternalTool(_)));
    }
}
