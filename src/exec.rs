use std::fs;
use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};

/// Run one command line through the shell, with the child's stdout and
/// stderr passing straight through. Command strings from the project file
/// may contain shell constructs, so they are not tokenized here.
pub fn run(command: &str) -> Result<()> {
    let status = shell(command)
        .status()
        .map_err(|e| Error::io("sh", e))?;
    if status.success() {
        return Ok(());
    }
    Err(Error::Child {
        command: command.to_string(),
        code: status.code().unwrap_or(1),
    })
}

#[cfg(not(target_os = "windows"))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(target_os = "windows")]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Remove the configuration's output tree and recreate it empty. Nothing
/// outside the output directory is ever touched.
pub fn clean_output_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))
}
