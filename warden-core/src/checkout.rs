//! Local source checkout refresh.
//!
//! The fix generator reads source files from a local clone. Before a run the
//! clone is fetched and hard-reset to `origin/<base>` so context matches what
//! pull requests will target.

use crate::{Error, Result};
use std::path::Path;
use std::process::Command;

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::Git(format!("failed to run git {}: {}", args.join(" "), e)))?;

    if !output.status.success() {
        return Err(Error::Git(format!(
            "git {} failed ({}): {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Fetch `base_branch` and hard-reset the checkout at `path` onto it.
pub fn sync_checkout(path: &Path, base_branch: &str) -> Result<()> {
    if !path.is_dir() {
        return Err(Error::Git(format!(
            "checkout not found at {}",
            path.display()
        )));
    }

    tracing::info!(path = %path.display(), base = base_branch, "Refreshing checkout");
    run_git(path, &["fetch", "origin", base_branch])?;
    run_git(path, &["checkout", "--force", base_branch])?;
    run_git(path, &["reset", "--hard", &format!("origin/{}", base_branch)])?;

    let head = run_git(path, &["rev-parse", "--short", "HEAD"])?;
    tracing::info!(head = %head, "Checkout up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_checkout_is_git_error() {
        let err = sync_checkout(Path::new("/definitely/not/here"), "main").unwrap_err();
        assert!(matches!(err, Error::Git(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn non_repository_is_git_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            sync_checkout(dir.path(), "main"),
            Err(Error::Git(_))
        ));
    }
}
