use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};
use crate::executor::ExecCtx;

const COMMITTER_NAME: &str = "dotbuild";
const COMMITTER_EMAIL: &str = "dotbuild@localhost";

fn git(dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(dir)
        .arg("-c")
        .arg("commit.gpgsign=false")
        .env("GIT_AUTHOR_NAME", COMMITTER_NAME)
        .env("GIT_AUTHOR_EMAIL", COMMITTER_EMAIL)
        .env("GIT_COMMITTER_NAME", COMMITTER_NAME)
        .env("GIT_COMMITTER_EMAIL", COMMITTER_EMAIL);
    cmd
}

/// Turn an unpacked engine tree into a git repository with a single commit
/// holding the pristine sources, so later changes show up as diffs.
pub fn init_engine_repo(ctx: &ExecCtx, dir: &Path, version: &str, branch: &str) -> Result<()> {
    if !dir.is_dir() {
        return Err(Error::msg(format!(
            "engine dir {} does not exist",
            dir.display()
        )));
    }
    let branch = branch.trim();
    if branch.is_empty() {
        return Err(Error::msg("init branch name is empty"));
    }

    ctx.log(&format!("initializing git repository in {}", dir.display()));
    let mut init = git(dir);
    init.arg("init").arg("-q");
    ctx.run_cmd(init)?;

    let mut checkout = git(dir);
    checkout.arg("checkout").arg("-q").arg("-b").arg(branch);
    ctx.run_cmd(checkout)?;

    ctx.log("staging engine sources (this takes a while)...");
    let mut add = git(dir);
    add.arg("add").arg("-f").arg(".");
    ctx.run_cmd(add)?;

    let mut commit = git(dir);
    commit
        .arg("commit")
        .arg("-q")
        .arg("--no-verify")
        .arg("-m")
        .arg(format!("Firefox {version}"));
    ctx.run_cmd(commit)?;

    ctx.log(&format!("engine committed on branch '{branch}'"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::executor::MemorySink;

    fn ctx() -> ExecCtx {
        ExecCtx::new(false, Arc::new(MemorySink::default()))
    }

    fn git_out(dir: &Path, args: &[&str]) -> String {
        let out = git(dir).args(args).output().expect("git");
        assert!(out.status.success(), "git {args:?} failed");
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    #[test]
    fn commits_pristine_sources_on_the_branch() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("mach"), "#!/bin/sh\n").unwrap();
        std::fs::create_dir_all(dir.path().join("browser/app")).unwrap();
        std::fs::write(dir.path().join("browser/app/moz.build"), "").unwrap();

        init_engine_repo(&ctx(), dir.path(), "115.0", " ember ").expect("init");

        assert_eq!(git_out(dir.path(), &["rev-parse", "--abbrev-ref", "HEAD"]), "ember");
        assert_eq!(git_out(dir.path(), &["log", "-1", "--format=%s"]), "Firefox 115.0");
        assert_eq!(git_out(dir.path(), &["log", "-1", "--format=%an"]), COMMITTER_NAME);
        let tracked = git_out(dir.path(), &["ls-files"]);
        assert!(tracked.lines().any(|l| l == "browser/app/moz.build"), "{tracked}");
        assert_eq!(git_out(dir.path(), &["status", "--porcelain"]), "");
    }

    #[test]
    fn rejects_missing_dir_and_empty_branch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("engine");
        let err = init_engine_repo(&ctx(), &missing, "115.0", "main")
            .unwrap_err()
            .to_string();
        assert!(err.contains("does not exist"), "unexpected err: {err}");

        let err = init_engine_repo(&ctx(), dir.path(), "115.0", "  ")
            .unwrap_err()
            .to_string();
        assert!(err.contains("branch name is empty"), "unexpected err: {err}");
        assert!(!dir.path().join(".git").exists());
    }
}
