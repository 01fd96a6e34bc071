use std::path::Path;
use std::process::Command;

use crate::acquire::metadata;
use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::mozconfig::{self, Target};
use crate::project::ProjectConfig;
use crate::workspace::WorkspacePaths;

/// `./mach <args>` inside the engine tree; Windows has no shebang support so
/// the script goes through python there.
pub fn mach(engine_dir: &Path, args: &[&str]) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("python3");
        c.arg("mach");
        c
    } else {
        Command::new("./mach")
    };
    cmd.current_dir(engine_dir).args(args);
    cmd
}

/// Regenerate the mozconfig and hand the tree to the build driver.
pub fn build(ctx: &ExecCtx, ws: &WorkspacePaths, cfg: &ProjectConfig, target: &Target) -> Result<()> {
    if !ws.engine_dir.join("mach").is_file() {
        return Err(Error::msg(format!(
            "no engine sources in {}; run `dotbuild download` first",
            ws.engine_dir.display()
        )));
    }
    if let Some(meta) = metadata::read(&ws.metadata_file)? {
        ctx.log(&format!("building against firefox {}", meta.version));
    }

    ctx.step("configure", |ctx| {
        mozconfig::write_mozconfig(ctx, ws, cfg, target).map(|_| ())
    })?;
    ctx.step("build", |ctx| ctx.run_cmd(mach(&ws.engine_dir, &["build"])))
}
