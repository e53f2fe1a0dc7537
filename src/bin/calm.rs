use calm::config::Config;
use clap::Parser;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "calm")]
#[command(about = "Cygwin package-repository maintenance engine", long_about = None)]
#[command(version = VERSION)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Run as a long-lived signal-driven daemon instead of a single cycle
    #[arg(long)]
    daemon: bool,

    /// Compute movelists and the index without touching the filesystem
    #[arg(long)]
    dry_run: bool,

    /// Skip stale-package retirement this cycle
    #[arg(long)]
    no_stale: bool,

    /// Root of maintainer home directories (upload staging area)
    #[arg(long, value_name = "DIR")]
    homedir: Option<String>,

    /// Root of the release area
    #[arg(long = "releasearea", value_name = "DIR")]
    rel_area: Option<String>,

    /// Root of the vault
    #[arg(long, value_name = "DIR")]
    vault: Option<String>,

    /// Root of the automated-build staging directory
    #[arg(long, value_name = "DIR")]
    stagingdir: Option<String>,

    /// Path to the package-maintainer list file
    #[arg(long, value_name = "FILE")]
    pkglist: Option<String>,

    /// Name of the default orphan-package maintainer
    #[arg(long = "orphanmaint", value_name = "NAME")]
    orphan_maint: Option<String>,

    /// GPG key id used to sign the index (repeatable)
    #[arg(long = "key", value_name = "KEYID")]
    keys: Vec<String>,

    /// value of the setup-release key written into setup.ini
    #[arg(long)]
    release: Option<String>,

    /// Disable a validator check crate-wide (repeatable), e.g. curr-most-recent
    #[arg(long = "disable-check", value_name = "CHECK")]
    disable_check: Vec<String>,

    /// Increase logging verbosity (RUST_LOG still takes precedence)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    calm::logging::init_tracing();

    let args = Args::parse();
    tracing::info!("calm version {VERSION}");

    let mut config = Config::load(args.config.as_deref())?;
    config.dry_run = args.dry_run;
    if args.no_stale {
        config.stale = false;
    }
    if let Some(homedir) = args.homedir {
        config.homedir = homedir.into();
    }
    if let Some(rel_area) = args.rel_area {
        config.rel_area = rel_area.into();
    }
    if let Some(vault) = args.vault {
        config.vault = vault.into();
    }
    if let Some(stagingdir) = args.stagingdir {
        config.stagingdir = stagingdir.into();
    }
    if let Some(pkglist) = args.pkglist {
        config.pkglist = pkglist.into();
    }
    if args.orphan_maint.is_some() {
        config.orphan_maint = args.orphan_maint;
    }
    if !args.keys.is_empty() {
        config.keys = args.keys;
    }
    if let Some(release) = args.release {
        config.release = release;
    }
    if !args.disable_check.is_empty() {
        config.disable_check = args.disable_check;
    }
    if args.verbose > 0 {
        tracing::debug!(level = args.verbose, "verbose flag set, RUST_LOG takes precedence over it");
    }

    if args.daemon {
        calm::run_daemon(config).await?;
    } else {
        let report = calm::run_once(config)?;
        tracing::info!(added = report.added, vaulted = report.vaulted, "cycle complete");
    }

    Ok(())
}
