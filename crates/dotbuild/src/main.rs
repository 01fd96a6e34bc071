use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dotbuild::Result;
use dotbuild::acquire::{self, AcquireOptions, HttpFetcher, Supervisor};
use dotbuild::config::{self, ConfigDoc};
use dotbuild::executor::{ExecCtx, TracingSink};
use dotbuild::mozconfig::Target;
use dotbuild::project::ProjectConfig;
use dotbuild::workspace::{self, WorkspacePaths};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Project definition
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Show debug output (subprocess chatter, state transitions)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
    /// Print external commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Download and unpack a Firefox source release into the engine dir
    Download {
        /// Firefox version, e.g. 115.0 (defaults to [firefox].version)
        version: Option<String>,
    },
    /// Turn an unpacked engine dir into a git repository
    Init {
        dir: PathBuf,
        /// Version recorded in the initial commit (defaults to the downloaded one)
        #[arg(long)]
        version: Option<String>,
        /// Branch to create (defaults to [init].branch)
        #[arg(long)]
        branch: Option<String>,
    },
    /// Write <engine>/mozconfig from the configuration fragments
    Configure {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Configure, then run the engine's build driver
    Build {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Print the fully-resolved project TOML (after imports/extends)
    Resolve,
}

#[derive(Debug, clap::Args)]
struct TargetArgs {
    /// Target OS (linux, darwin/macos, win32/windows); defaults to the host
    #[arg(long)]
    os: Option<String>,
    /// Target architecture (x86_64, aarch64, i686, ...); defaults to the host
    #[arg(long)]
    arch: Option<String>,
}

impl TargetArgs {
    fn resolve(&self) -> Target {
        let host = Target::host();
        match (&self.os, &self.arch) {
            (None, None) => host,
            (os, arch) => Target::new(
                os.as_deref().unwrap_or(std::env::consts::OS),
                arch.as_deref().unwrap_or(&host.arch),
            ),
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

struct Session {
    doc: ConfigDoc,
    cfg: ProjectConfig,
    ws: WorkspacePaths,
    ctx: ExecCtx,
}

fn open(args: &Args) -> Result<Session> {
    let doc = config::load_or_default(&args.config)?;
    let cfg = ProjectConfig::from_doc(&doc)?;
    let ws = workspace::load_paths(&doc.base_dir(), &cfg.workspace)?;
    let ctx = ExecCtx::new(args.dry_run, Arc::new(TracingSink));
    Ok(Session { doc, cfg, ws, ctx })
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs);

    let s = open(&args)?;
    match &args.cmd {
        Cmd::Download { version } => cmd_download(&s, &args.config, version.clone()),
        Cmd::Init {
            dir,
            version,
            branch,
        } => cmd_init(&s, dir, version.clone(), branch.clone()),
        Cmd::Configure { target } => {
            dotbuild::mozconfig::write_mozconfig(&s.ctx, &s.ws, &s.cfg, &target.resolve())
                .map(|_| ())
        }
        Cmd::Build { target } => dotbuild::driver::build(&s.ctx, &s.ws, &s.cfg, &target.resolve()),
        Cmd::Resolve => cmd_resolve(&s.doc),
    }
}

fn cmd_download(s: &Session, config_file: &Path, version: Option<String>) -> Result<()> {
    let opts = AcquireOptions {
        version: version.or_else(|| s.cfg.firefox.version.clone()),
        archive_host: s.cfg.firefox.archive_host.clone(),
        verify_checksum: s.cfg.firefox.verify_checksum,
        skip_init: s.cfg.init.skip || acquire::skip_init_from_env(),
        init_branch: s.cfg.init.branch.clone(),
        config_file: Some(std::path::absolute(config_file)?),
        show_progress: true,
    };
    let mut sup = Supervisor::new(&s.ctx, &s.ws, opts, HttpFetcher::new()?);
    sup.run()?;
    std::process::exit(0);
}

fn cmd_init(s: &Session, dir: &Path, version: Option<String>, branch: Option<String>) -> Result<()> {
    let version = match version {
        Some(v) => v,
        None => acquire::metadata::read(&s.ws.metadata_file)?
            .map(|m| m.version)
            .or_else(|| s.cfg.firefox.version.clone())
            .ok_or_else(|| dotbuild::Error::msg("no version known; pass --version"))?,
    };
    let branch = branch.unwrap_or_else(|| s.cfg.init.branch.clone());
    dotbuild::init::init_engine_repo(&s.ctx, dir, &version, &branch)
}

fn cmd_resolve(doc: &ConfigDoc) -> Result<()> {
    let s = toml::to_string_pretty(&doc.value).unwrap_or_else(|_| format!("{:?}", doc.value));
    print!("{s}");
    Ok(())
}
