//! solvr command-line client
//!
//! Talks to the solvr equation server: log in, register, reset a password
//! and solve linear or quadratic equations, either one command at a time or
//! in an interactive shell that keeps the connection open.

mod forms;
mod session;
mod shell;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use solvr_client::Endpoint;
use solvr_client::config::{Config, Directories, State};
use solvr_protocol::FramingMode;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::session::{Outcome, Registration, Session};

/// solvr equation service client
#[derive(Parser)]
#[command(name = "solvr")]
#[command(about = "Client for the solvr equation service")]
#[command(version)]
#[command(after_help = "\
Examples:
  solvr login alice --remember         Log in and remember the login name
  solvr solve linear 2 -8              Solve 2x - 8 = 0
  solvr solve --login alice quadratic 1 -3 2
  solvr reset request alice@example.com
  solvr shell                          Interactive session
  solvr --server 10.0.0.5:9000 shell   Use another server

The password is read from SOLVR_PASSWORD, or prompted for.
")]
struct Cli {
    /// Server address, overrides the config file
    #[arg(long, global = true, value_name = "HOST:PORT")]
    server: Option<Endpoint>,

    /// Frame boundary detection (chunk or line), overrides the config file
    #[arg(long, global = true)]
    framing: Option<FramingMode>,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to the server
    Login {
        /// Login name; defaults to the remembered one
        login: Option<String>,

        /// Remember the login name for next time (the password is never stored)
        #[arg(long)]
        remember: bool,
    },

    /// Create an account
    Register {
        login: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        last_name: String,

        #[arg(long)]
        first_name: String,

        #[arg(long, default_value = "")]
        middle_name: String,

        /// Generate a strong password instead of reading one
        #[arg(long)]
        generate_password: bool,
    },

    /// Password reset
    Reset {
        #[command(subcommand)]
        command: ResetCommand,
    },

    /// Solve an equation
    Solve {
        /// Log in with this name before solving
        #[arg(long)]
        login: Option<String>,

        #[command(subcommand)]
        equation: Equation,
    },

    /// Interactive session over one connection
    Shell,

    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ResetCommand {
    /// Ask the server to email a reset code
    Request { email: String },

    /// Set a new password using the emailed code
    Confirm { email: String, code: String },
}

#[derive(Subcommand)]
enum Equation {
    /// A*x + B = 0
    Linear {
        #[arg(allow_hyphen_values = true)]
        a: String,
        #[arg(allow_hyphen_values = true)]
        b: String,
    },

    /// A*x^2 + B*x + C = 0
    Quadratic {
        #[arg(allow_hyphen_values = true)]
        a: String,
        #[arg(allow_hyphen_values = true)]
        b: String,
        #[arg(allow_hyphen_values = true)]
        c: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Print the config file location
    Path,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("solvr={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("solvr-{timestamp}.log");

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Lives for the whole process; dropping it would stop the writer thread.
        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();

        debug!("Logging to {}", temp_dir.join(&log_filename).display());
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging();

    let dirs = Directories::new()?;
    let config_path = cli.config.clone().unwrap_or_else(|| dirs.config_file.clone());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    if let Some(server) = cli.server {
        config.server.host = server.host;
        config.server.port = server.port;
    }
    if let Some(framing) = cli.framing {
        config.connection.framing = framing;
    }

    match cli.command {
        Commands::Config { command } => run_config(command, &config, &config_path),
        Commands::Login { login, remember } => {
            run_login(&config, &dirs.state_file, login, remember).await
        }
        Commands::Register {
            login,
            email,
            last_name,
            first_name,
            middle_name,
            generate_password,
        } => {
            let password = if generate_password {
                let password = forms::generate_password();
                println!("Generated password: {password}");
                password
            } else {
                shell::read_password("Password: ")?
            };
            let form = Registration {
                login,
                password,
                email,
                last_name,
                first_name,
                middle_name,
            };
            run_once(&config, |session| Box::pin(async move { session.register(&form).await }))
                .await
        }
        Commands::Reset { command } => run_reset(&config, command).await,
        Commands::Solve { login, equation } => run_solve(&config, login, equation).await,
        Commands::Shell => {
            let session = connect(&config).await?;
            shell::run(session).await
        }
    }
}

async fn connect(config: &Config) -> Result<Session> {
    Session::connect(config.endpoint(), config.connection_options()).await
}

type SessionFuture<'a> =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Outcome>> + 'a>>;

/// Connect, run one exchange, always shut down, then report the outcome.
async fn run_once<F>(config: &Config, exchange: F) -> Result<()>
where
    F: for<'a> FnOnce(&'a Session) -> SessionFuture<'a>,
{
    let session = connect(config).await?;
    let result = exchange(&session).await;
    session.close().await;

    report(result?)
}

fn report(outcome: Outcome) -> Result<()> {
    if outcome.is_success() {
        println!("{outcome}");
        Ok(())
    } else {
        bail!("{outcome}")
    }
}

async fn run_login(
    config: &Config,
    state_file: &Path,
    login: Option<String>,
    remember: bool,
) -> Result<()> {
    let mut state = State::load(state_file).unwrap_or_else(|e| {
        warn!("Ignoring unreadable state file: {}", e);
        State::default()
    });

    let login = match login.or_else(|| state.last_login.clone()) {
        Some(login) => login,
        None => bail!("No login given and none remembered; run: solvr login <LOGIN> --remember"),
    };
    let password = shell::read_password("Password: ")?;

    let session = connect(config).await?;
    let result = session.login(&login, &password).await;
    session.close().await;
    let outcome = result?;

    if outcome.is_success() && remember {
        state.last_login = Some(login);
        state
            .save(state_file)
            .with_context(|| format!("Failed to write {}", state_file.display()))?;
        debug!("Remembered login in {}", state_file.display());
    }

    report(outcome)
}

async fn run_reset(config: &Config, command: ResetCommand) -> Result<()> {
    match command {
        ResetCommand::Request { email } => {
            run_once(config, |session| {
                Box::pin(async move { session.request_reset(&email).await })
            })
            .await
        }
        ResetCommand::Confirm { email, code } => {
            let password = shell::read_password("New password: ")?;
            run_once(config, |session| {
                Box::pin(async move { session.confirm_reset(&email, &code, &password).await })
            })
            .await
        }
    }
}

async fn run_solve(config: &Config, login: Option<String>, equation: Equation) -> Result<()> {
    let password = match &login {
        Some(_) => Some(shell::read_password("Password: ")?),
        None => None,
    };

    run_once(config, |session| {
        Box::pin(async move {
            if let (Some(login), Some(password)) = (&login, &password) {
                let outcome = session.login(login, password).await?;
                if !outcome.is_success() {
                    return Ok(outcome);
                }
            }

            match &equation {
                Equation::Linear { a, b } => session.solve_linear(a, b).await,
                Equation::Quadratic { a, b, c } => session.solve_quadratic(a, b, c).await,
            }
        })
    })
    .await
}

fn run_config(command: ConfigCommand, config: &Config, path: &Path) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCommand::Path => {
            println!("{}", path.display());
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default()
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
