use std::env;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, error, info};
use tokio::net::TcpListener;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

use swamp_proxy::api::{AppState, create_router};
use swamp_proxy::auth::AuthState;
use swamp_proxy::collector::HtCondorCollector;
use swamp_proxy::db::Database;
use swamp_proxy::directory::{SqliteDirectory, new_membership_uid};
use swamp_proxy::proxy::ProxyCache;
use swamp_proxy::settings::{
    APP_NAME, AppConfig, AppPaths, load_or_init_config, write_default_config,
};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

#[tokio::main]
async fn directory_main(ctx: RuntimeContext, cmd: DirectoryCommand) -> Result<()> {
    handle_directory(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    let _log_guard = ctx.init_logging()?;
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Serve(cmd) => async_main(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Token(cmd) => handle_token(&ctx, cmd),
        Command::User { command } => directory_main(ctx, DirectoryCommand::User(command)),
        Command::Project { command } => directory_main(ctx, DirectoryCommand::Project(command)),
        Command::Member { command } => directory_main(ctx, DirectoryCommand::Member(command)),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "SWAMP viewer instance proxy.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the proxy server
    Serve(ServeCommand),
    /// Create the default config file
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Mint a session token for a user
    Token(TokenCommand),
    /// Manage directory users
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Manage directory projects
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },
    /// Manage project memberships
    Member {
        #[command(subcommand)]
        command: MemberCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone, Args)]
struct TokenCommand {
    /// The user's `user_uid`
    user_uid: String,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Add a user
    Add {
        user_uid: String,
        /// Login name sent to viewers (lowercased on the wire)
        username: String,
    },
}

#[derive(Debug, Subcommand)]
enum ProjectCommand {
    /// Add a project
    Add {
        project_uid: String,
        /// Owning user's `user_uid`
        #[arg(long)]
        owner: String,
        /// Display name
        #[arg(long, default_value = "")]
        name: String,
    },
}

#[derive(Debug, Subcommand)]
enum MemberCommand {
    /// Grant a user membership in a project
    Add {
        project_uid: String,
        user_uid: String,
        /// Mark the membership as project admin
        #[arg(long)]
        admin: bool,
        /// Membership id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// End a membership
    End { membership_uid: String },
}

#[derive(Debug)]
enum DirectoryCommand {
    User(UserCommand),
    Project(ProjectCommand),
    Member(MemberCommand),
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&paths, common.dry_run)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    /// The returned guard flushes the log file on drop.
    fn init_logging(&self) -> Result<Option<WorkerGuard>> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(None);
        }

        let (file_layer, guard) = match self.config.logging.file.as_deref() {
            Some(file) => {
                let (writer, guard) = log_file_writer(Path::new(file))?;
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let level = self.effective_log_level().to_string().to_lowercase();

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("swamp_proxy={level},tower_http={level}"))
        });

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(guard)
    }

    /// CLI flags win; otherwise `logging.level` from the config.
    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

/// Non-blocking appender for `logging.file`, creating its directory.
fn log_file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("logging.file has no file name: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, name);
    Ok(tracing_appender::non_blocking(appender))
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    write_default_config(&ctx.paths.config_file)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_token(ctx: &RuntimeContext, cmd: TokenCommand) -> Result<()> {
    ctx.config
        .auth
        .validate()
        .context("invalid auth configuration")?;
    let token = AuthState::new(ctx.config.auth.clone())
        .generate_token(&cmd.user_uid)
        .map_err(|e| anyhow!("minting token: {e}"))?;
    println!("{token}");
    Ok(())
}

async fn handle_directory(ctx: &RuntimeContext, command: DirectoryCommand) -> Result<()> {
    let db_path = ctx.paths.database_path(&ctx.config)?;
    if ctx.common.dry_run {
        info!("dry-run: would apply {:?} to {}", command, db_path.display());
        return Ok(());
    }

    let db = Database::new(&db_path).await?;
    let directory = SqliteDirectory::new(db.pool().clone());

    let record = match command {
        DirectoryCommand::User(UserCommand::Add { user_uid, username }) => {
            let user = directory.create_user(&user_uid, &username).await?;
            serde_json::to_value(user)?
        }
        DirectoryCommand::Project(ProjectCommand::Add {
            project_uid,
            owner,
            name,
        }) => {
            let project = directory.create_project(&project_uid, &owner, &name).await?;
            serde_json::to_value(project)?
        }
        DirectoryCommand::Member(MemberCommand::Add {
            project_uid,
            user_uid,
            admin,
            id,
        }) => {
            let membership_uid = id.unwrap_or_else(new_membership_uid);
            directory
                .add_membership(&membership_uid, &project_uid, &user_uid, admin)
                .await?;
            serde_json::json!({
                "membership_uid": membership_uid,
                "project_uid": project_uid,
                "user_uid": user_uid,
                "admin": admin,
            })
        }
        DirectoryCommand::Member(MemberCommand::End { membership_uid }) => {
            if !directory.end_membership(&membership_uid).await? {
                return Err(anyhow!("no active membership {membership_uid}"));
            }
            serde_json::json!({ "membership_uid": membership_uid, "ended": true })
        }
    };

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else if ctx.common.yaml {
        println!("{}", serde_yaml::to_string(&record)?);
    } else {
        info!("directory updated at {}", db_path.display());
        println!("{record}");
    }
    Ok(())
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let config = &ctx.config;
    config
        .auth
        .validate()
        .context("invalid auth configuration")?;

    let db_path = ctx.paths.database_path(config)?;
    info!("Opening directory database at {}", db_path.display());
    let db = Database::new(&db_path).await?;

    let directory = Arc::new(SqliteDirectory::new(db.pool().clone()));
    let collector = Arc::new(HtCondorCollector::new(
        config.collector.binary.clone(),
        config.collector.pool_host.clone(),
        config.collector.timeout(),
    ));
    info!(
        "Using collector {} at {}",
        config.collector.binary, config.collector.pool_host
    );

    let state = AppState::new(config, collector, directory)?;

    if config.cache.enabled && config.cache.sweep_interval_secs > 0 {
        spawn_cache_sweeper(
            state.proxy.cache().clone(),
            Duration::from_secs(config.cache.sweep_interval_secs),
        );
    }

    let app = create_router(state);

    let host = cmd.host.unwrap_or_else(|| config.server.host.clone());
    let port = cmd.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;

    info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    info!("Shutdown complete");
    Ok(())
}

/// Periodically drop expired cache entries so idle keys do not pile up.
fn spawn_cache_sweeper(cache: Arc<ProxyCache>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!("purged {} expired cache entries", purged);
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_writer_creates_directory_and_flushes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("proxy.log");

        let (mut writer, guard) = log_file_writer(&path).unwrap();
        writer.write_all(b"viewer proxy started\n").unwrap();
        drop(guard);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("viewer proxy started"));
    }

    #[test]
    fn cli_parses_directory_commands() {
        let cli = Cli::try_parse_from([
            "swamp-proxy",
            "member",
            "add",
            "proj-1",
            "usr-1",
            "--admin",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Member {
                command: MemberCommand::Add { admin: true, id: None, .. }
            }
        ));
    }
}
