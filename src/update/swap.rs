//! Replace the executable on disk, with a backup to fall back on.
//!
//! The swap runs as a small state machine:
//!
//! ```text
//! Idle -> BackedUp -> Replaced -> Confirmed            (atomic rename)
//! Idle -> BackedUp -> Pending                          (deferred script)
//! Idle -> BackedUp -> RollbackAttempted -> Failed      (replace failed)
//! ```
//!
//! On platforms that lock a running binary the rename cannot happen while we
//! are alive, so a helper script does the copy after this process exits. That
//! path returns as soon as the script is launched and nothing checks that the
//! script actually finished.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, error, info, warn};

use super::download::{file_sha256, DownloadResult};
use super::{UpdateError, UpdateResult};

/// `<executable>.bak`
pub fn backup_path_for(executable: &Path) -> PathBuf {
    let mut name = executable.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// How the new binary is put in place, chosen once per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStrategy {
    /// Rename the staged file over the executable.
    AtomicReplace,
    /// Hand the swap to a detached script that runs after we exit.
    DeferredScriptReplace,
}

impl SwapStrategy {
    pub fn for_current_platform() -> Self {
        if cfg!(windows) {
            SwapStrategy::DeferredScriptReplace
        } else {
            SwapStrategy::AtomicReplace
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Idle,
    BackedUp,
    Replaced,
    Confirmed,
    Pending,
    RollbackAttempted,
    Failed,
}

/// Snapshot of the executable taken before anything destructive happens.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub backup_path: PathBuf,
    /// Hex SHA-256 of the backed up bytes.
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The new binary is at the executable path now.
    Confirmed,
    /// A helper script will swap the binary once this process exits.
    Deferred { script: PathBuf },
}

pub struct SwapManager {
    executable: PathBuf,
    backup: PathBuf,
    strategy: SwapStrategy,
    state: SwapState,
}

impl SwapManager {
    pub fn new(executable: &Path, backup: &Path, strategy: SwapStrategy) -> Self {
        Self {
            executable: executable.to_path_buf(),
            backup: backup.to_path_buf(),
            strategy,
            state: SwapState::Idle,
        }
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    fn transition(&mut self, next: SwapState) {
        debug!("swap {}: {:?} -> {:?}", self.executable.display(), self.state, next);
        self.state = next;
    }

    /// Copy the current executable to `<executable>.bak`, replacing any
    /// previous backup.
    pub fn backup(&mut self) -> UpdateResult<BackupRecord> {
        let backup_failed = |source: io::Error| UpdateError::BackupFailed {
            path: self.backup.clone(),
            source,
        };

        // A previous backup may be read-only (copied from a 0555 install).
        match fs::remove_file(&self.backup) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(backup_failed(e)),
            _ => {}
        }
        if let Err(e) = fs::copy(&self.executable, &self.backup) {
            let _ = fs::remove_file(&self.backup);
            return Err(backup_failed(e));
        }
        let sha256 = file_sha256(&self.backup).map_err(backup_failed)?;

        info!("Backed up {} to {}", self.executable.display(), self.backup.display());
        self.transition(SwapState::BackedUp);
        Ok(BackupRecord {
            backup_path: self.backup.clone(),
            sha256,
        })
    }

    /// Put the staged binary in place using this manager's strategy.
    ///
    /// `relaunch` is the argument list a deferred script starts the new
    /// binary with; `None` installs without starting it.
    pub fn replace(
        &mut self,
        staged: DownloadResult,
        record: &BackupRecord,
        relaunch: Option<&[String]>,
    ) -> UpdateResult<SwapOutcome> {
        debug_assert_eq!(self.state, SwapState::BackedUp);
        match self.strategy {
            SwapStrategy::AtomicReplace => self.replace_atomic(staged, record),
            SwapStrategy::DeferredScriptReplace => self.replace_deferred(staged, record, relaunch),
        }
    }

    fn replace_atomic(&mut self, staged: DownloadResult, record: &BackupRecord) -> UpdateResult<SwapOutcome> {
        let expected = staged.sha256;
        if let Err(e) = staged.temp_path.persist(&self.executable) {
            // Dropping the returned path deletes the staged file.
            return Err(self.rollback(record, e.error));
        }
        self.transition(SwapState::Replaced);

        match file_sha256(&self.executable) {
            Ok(actual) if actual == expected => {
                self.transition(SwapState::Confirmed);
                Ok(SwapOutcome::Confirmed)
            }
            Ok(actual) => Err(self.rollback(
                record,
                io::Error::other(format!(
                    "installed binary hash {} does not match download {}",
                    actual, expected
                )),
            )),
            Err(e) => Err(self.rollback(record, e)),
        }
    }

    fn replace_deferred(
        &mut self,
        staged: DownloadResult,
        record: &BackupRecord,
        relaunch: Option<&[String]>,
    ) -> UpdateResult<SwapOutcome> {
        // The script owns the staged file from here on and deletes it itself.
        let new_binary = staged.temp_path.keep().map_err(|e| self.fail_before_swap(e.error))?;

        let script_path = std::env::temp_dir().join(format!("ota-update-{}.bat", std::process::id()));
        let script = render_replace_script(&self.executable, &new_binary, &record.backup_path, relaunch);

        let launched = fs::write(&script_path, script).and_then(|_| launch_detached(&script_path));
        if let Err(e) = launched {
            let _ = fs::remove_file(&script_path);
            let _ = fs::remove_file(&new_binary);
            return Err(self.fail_before_swap(e));
        }

        info!(
            "Launched {} to replace {} after exit",
            script_path.display(),
            self.executable.display()
        );
        self.transition(SwapState::Pending);
        Ok(SwapOutcome::Deferred { script: script_path })
    }

    /// Failure where the executable was never touched.
    fn fail_before_swap(&mut self, e: io::Error) -> UpdateError {
        self.transition(SwapState::Failed);
        UpdateError::ReplaceFailed {
            path: self.executable.clone(),
            reason: e.to_string(),
        }
    }

    /// Get the previous binary back after a failed replace.
    ///
    /// Returns `ReplaceFailed` when the executable is known good again, and
    /// `RollbackFailed` when it could not be restored.
    fn rollback(&mut self, record: &BackupRecord, replace_error: io::Error) -> UpdateError {
        self.transition(SwapState::RollbackAttempted);
        warn!(
            "Replacing {} failed ({}), rolling back",
            self.executable.display(),
            replace_error
        );

        let intact = file_sha256(&self.executable)
            .map(|hash| hash == record.sha256)
            .unwrap_or(false);

        let result = if intact {
            debug!("{} unchanged, nothing to restore", self.executable.display());
            Ok(())
        } else {
            fs::rename(&record.backup_path, &self.executable)
        };

        self.transition(SwapState::Failed);
        match result {
            Ok(()) => UpdateError::ReplaceFailed {
                path: self.executable.clone(),
                reason: replace_error.to_string(),
            },
            Err(source) => {
                error!(
                    "Could not restore {} from {}: {}. Manual intervention required.",
                    self.executable.display(),
                    record.backup_path.display(),
                    source
                );
                UpdateError::RollbackFailed {
                    executable: self.executable.clone(),
                    backup: record.backup_path.clone(),
                    replace_error: replace_error.to_string(),
                    source,
                }
            }
        }
    }
}

/// Quote a value for a batch file line.
fn batch_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('%', "%%").replace('"', "\"\""))
}

/// Batch script that waits for the running binary to be released, copies the
/// new binary over it (restoring the backup if the copy fails), optionally
/// relaunches it, and deletes itself.
pub fn render_replace_script(
    target: &Path,
    new_binary: &Path,
    backup: &Path,
    relaunch: Option<&[String]>,
) -> String {
    let quoted_target = batch_quote(&target.to_string_lossy());
    let start = match relaunch {
        Some(args) => {
            let args = args.iter().map(|a| batch_quote(a)).collect::<Vec<_>>();
            format!("start \"\" {} {}\r\n", quoted_target, args.join(" "))
        }
        None => String::new(),
    };
    let target = quoted_target;
    let new_binary = batch_quote(&new_binary.to_string_lossy());
    let backup = batch_quote(&backup.to_string_lossy());

    format!(
        "@echo off\r\n\
         :retry\r\n\
         ping -n 2 127.0.0.1 > nul\r\n\
         del {target}\r\n\
         if exist {target} goto retry\r\n\
         copy /y {new_binary} {target}\r\n\
         if errorlevel 1 copy /y {backup} {target}\r\n\
         {start}\
         del {new_binary}\r\n\
         del \"%~f0\"\r\n"
    )
}

/// `cmd /C <script>` with no console attached.
///
/// The script path is passed straight to `cmd`; going through `start` would
/// take a quoted path (any path with a space) as the window title.
fn detached_command(script: &Path) -> Command {
    let mut command = Command::new("cmd");
    command
        .arg("/C")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    command
}

fn launch_detached(script: &Path) -> io::Result<()> {
    detached_command(script).spawn().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::download::stage_artifact;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn setup(old: &[u8]) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("app");
        fs::write(&exe, old).unwrap();
        (dir, exe)
    }

    fn stage(dir: &Path, content: &[u8]) -> DownloadResult {
        stage_artifact(Cursor::new(content.to_vec()), dir, None).unwrap()
    }

    #[test]
    fn test_backup_path_for() {
        assert_eq!(
            backup_path_for(Path::new("/opt/app/bin/tool")),
            PathBuf::from("/opt/app/bin/tool.bak")
        );
        assert_eq!(
            backup_path_for(Path::new("C:/tools/tool.exe")),
            PathBuf::from("C:/tools/tool.exe.bak")
        );
    }

    #[test]
    fn test_strategy_for_current_platform() {
        let strategy = SwapStrategy::for_current_platform();
        if cfg!(windows) {
            assert_eq!(strategy, SwapStrategy::DeferredScriptReplace);
        } else {
            assert_eq!(strategy, SwapStrategy::AtomicReplace);
        }
    }

    #[test]
    fn test_backup_overwrites_previous_backup() {
        let (_dir, exe) = setup(b"current");
        fs::write(backup_path_for(&exe), b"stale backup").unwrap();

        let mut manager = SwapManager::new(&exe, &backup_path_for(&exe), SwapStrategy::AtomicReplace);
        let record = manager.backup().unwrap();

        assert_eq!(manager.state(), SwapState::BackedUp);
        assert_eq!(fs::read(&record.backup_path).unwrap(), b"current");
        assert_eq!(record.sha256, file_sha256(&exe).unwrap());
    }

    #[test]
    fn test_backup_failure_leaves_manager_idle() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("missing");

        let mut manager = SwapManager::new(&exe, &backup_path_for(&exe), SwapStrategy::AtomicReplace);
        assert!(matches!(manager.backup(), Err(UpdateError::BackupFailed { .. })));
        assert_eq!(manager.state(), SwapState::Idle);
        assert!(!backup_path_for(&exe).exists());
    }

    #[test]
    fn test_atomic_replace_confirms() {
        let (dir, exe) = setup(b"old binary");
        let staged = stage(dir.path(), b"new binary");
        let staged_path = staged.temp_path.to_path_buf();

        let mut manager = SwapManager::new(&exe, &backup_path_for(&exe), SwapStrategy::AtomicReplace);
        let record = manager.backup().unwrap();
        let outcome = manager.replace(staged, &record, None).unwrap();

        assert_eq!(outcome, SwapOutcome::Confirmed);
        assert_eq!(manager.state(), SwapState::Confirmed);
        assert_eq!(fs::read(&exe).unwrap(), b"new binary");
        assert_eq!(fs::read(backup_path_for(&exe)).unwrap(), b"old binary");
        assert!(!staged_path.exists());
    }

    #[test]
    fn test_replace_failure_keeps_original() {
        let (dir, exe) = setup(b"old binary");
        let staged = stage(dir.path(), b"new binary");
        // Rename source vanishes, so the rename itself fails.
        fs::remove_file(&staged.temp_path).unwrap();

        let mut manager = SwapManager::new(&exe, &backup_path_for(&exe), SwapStrategy::AtomicReplace);
        let record = manager.backup().unwrap();
        let result = manager.replace(staged, &record, None);

        assert!(matches!(result, Err(UpdateError::ReplaceFailed { .. })));
        assert_eq!(manager.state(), SwapState::Failed);
        assert_eq!(fs::read(&exe).unwrap(), b"old binary");
    }

    #[test]
    fn test_rollback_restores_from_backup() {
        let (_dir, exe) = setup(b"old binary");
        let mut manager = SwapManager::new(&exe, &backup_path_for(&exe), SwapStrategy::AtomicReplace);
        let record = manager.backup().unwrap();

        fs::write(&exe, b"half written").unwrap();
        let err = manager.rollback(&record, io::Error::other("disk full"));

        assert!(matches!(err, UpdateError::ReplaceFailed { .. }));
        assert_eq!(fs::read(&exe).unwrap(), b"old binary");
        assert_eq!(manager.state(), SwapState::Failed);
    }

    #[test]
    fn test_rollback_without_backup_is_fatal() {
        let (_dir, exe) = setup(b"old binary");
        let mut manager = SwapManager::new(&exe, &backup_path_for(&exe), SwapStrategy::AtomicReplace);
        let record = manager.backup().unwrap();

        fs::remove_file(&exe).unwrap();
        fs::remove_file(&record.backup_path).unwrap();
        let err = manager.rollback(&record, io::Error::other("disk full"));

        assert!(err.is_fatal());
        match err {
            UpdateError::RollbackFailed { replace_error, .. } => assert_eq!(replace_error, "disk full"),
            other => panic!("Expected RollbackFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_render_replace_script() {
        let args = vec!["--port".to_string(), "80%".to_string(), "say \"hi\"".to_string()];
        let script = render_replace_script(
            Path::new(r"C:\Apps\tool.exe"),
            Path::new(r"C:\Apps\.ota-update-x.bin"),
            Path::new(r"C:\Apps\tool.exe.bak"),
            Some(args.as_slice()),
        );

        assert!(script.starts_with("@echo off\r\n"));
        assert!(script.contains("del \"C:\\Apps\\tool.exe\"\r\n"));
        assert!(script.contains("if exist \"C:\\Apps\\tool.exe\" goto retry"));
        assert!(script.contains("copy /y \"C:\\Apps\\.ota-update-x.bin\" \"C:\\Apps\\tool.exe\""));
        assert!(script.contains("if errorlevel 1 copy /y \"C:\\Apps\\tool.exe.bak\" \"C:\\Apps\\tool.exe\""));
        assert!(script.contains("start \"\" \"C:\\Apps\\tool.exe\" \"--port\" \"80%%\" \"say \"\"hi\"\"\""));
        assert!(script.ends_with("del \"%~f0\"\r\n"));
    }

    #[test]
    fn test_render_replace_script_without_relaunch() {
        let script = render_replace_script(
            Path::new(r"C:\Apps\tool.exe"),
            Path::new(r"C:\Apps\.ota-update-x.bin"),
            Path::new(r"C:\Apps\tool.exe.bak"),
            None,
        );

        assert!(script.contains("copy /y \"C:\\Apps\\.ota-update-x.bin\" \"C:\\Apps\\tool.exe\""));
        assert!(!script.contains("start"));
        assert!(script.ends_with("del \"C:\\Apps\\.ota-update-x.bin\"\r\ndel \"%~f0\"\r\n"));
    }

    #[test]
    fn test_detached_command_runs_script_directly() {
        let script = Path::new(r"C:\Users\John Doe\AppData\Local\Temp\ota-update-42.bat");
        let command = detached_command(script);

        assert_eq!(command.get_program(), "cmd");
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, [std::ffi::OsStr::new("/C"), script.as_os_str()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_deferred_launch_failure_cleans_up() {
        // No `cmd` on Unix, so launching the script fails.
        let (dir, exe) = setup(b"old binary");
        let staged = stage(dir.path(), b"new binary");
        let staged_path = staged.temp_path.to_path_buf();

        let mut manager = SwapManager::new(&exe, &backup_path_for(&exe), SwapStrategy::DeferredScriptReplace);
        let record = manager.backup().unwrap();
        let result = manager.replace(staged, &record, None);

        assert!(matches!(result, Err(UpdateError::ReplaceFailed { .. })));
        assert_eq!(manager.state(), SwapState::Failed);
        assert!(!staged_path.exists());
        assert_eq!(fs::read(&exe).unwrap(), b"old binary");
    }

    #[cfg(unix)]
    #[test]
    fn test_backup_replaces_read_only_backup() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, exe) = setup(b"current");
        let stale = backup_path_for(&exe);
        fs::write(&stale, b"stale backup").unwrap();
        fs::set_permissions(&stale, fs::Permissions::from_mode(0o444)).unwrap();

        let mut manager = SwapManager::new(&exe, &stale, SwapStrategy::AtomicReplace);
        let record = manager.backup().unwrap();

        assert_eq!(fs::read(&record.backup_path).unwrap(), b"current");
        assert_eq!(manager.state(), SwapState::BackedUp);
    }
}
