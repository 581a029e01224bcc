mod commands;

use aid_core::{install_signal_handler, resolve_home, Engine};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{CliError, EXIT_FAILURE};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "aid",
    version,
    about = "Build, run and serve containerised machine-learning solvers"
)]
struct Cli {
    /// aid home directory [default: $AID_HOME or ~/.aid]
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the image for one solver of an installed package.
    Build {
        /// Solver reference: vendor/package/solver.
        reference: String,
        /// Build again even if an image with this title exists.
        #[arg(long, default_value_t = false)]
        rebuild: bool,
    },
    /// Create a container from an image.
    Create {
        /// Image UID.
        image: String,
        /// Host port that publishes the solver [default: daemon.default_container_port]
        #[arg(long)]
        port: Option<String>,
    },
    /// Start a created or stopped container.
    Start {
        /// Container UID.
        container: String,
    },
    /// Stop a running container.
    Stop {
        /// Container UID.
        container: String,
    },
    /// Remove a container, an image or an installed package.
    Remove {
        /// What to remove: container, image or package.
        kind: String,
        /// Container or image UID, or vendor/package.
        id: String,
        /// Do not ask for confirmation.
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },
    /// List images, containers, solvers or installed packages.
    List {
        /// images, containers, solvers or packages.
        #[arg(default_value = "containers")]
        kind: String,
    },
    /// Show a container or image record, or a package's metadata.
    Inspect {
        /// container, image or package.
        kind: String,
        /// Record UID, or vendor/package.
        id: String,
    },
    /// Show or change a package's environment variables.
    Env {
        /// Package reference: vendor/package.
        reference: String,
        /// Environment such as dev or prod [default for listing: all]
        #[arg(long = "env")]
        environment: Option<String>,
        /// Set KEY=VALUE (repeatable, needs --env).
        #[arg(long)]
        set: Vec<String>,
        /// Remove KEY (repeatable, needs --env).
        #[arg(long)]
        unset: Vec<String>,
    },
    /// Regenerate runners and Dockerfiles for every solver of a package.
    Generate {
        /// Package reference: vendor/package.
        reference: String,
    },
    /// Print a solver's Dockerfile, or replace it with --set.
    Dockerfile {
        /// Solver reference: vendor/package/solver.
        reference: String,
        /// File whose contents become the new Dockerfile.
        #[arg(long)]
        set: Option<PathBuf>,
    },
    /// Print a stored build log.
    Logs {
        /// Log id, as printed by build.
        id: String,
    },
    /// Send key=value parameters to a running solver and print its reply.
    Infer {
        /// Container UID.
        container: String,
        /// Parameters as key=value.
        params: Vec<String>,
    },
    /// Serve the lifecycle verbs over HTTP.
    Daemon {
        /// Port to listen on [default: daemon.port]
        #[arg(long)]
        port: Option<u16>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

impl Commands {
    /// Commands that reach the container engine.
    fn needs_runtime(&self) -> bool {
        matches!(
            self,
            Self::Build { .. }
                | Self::Create { .. }
                | Self::Start { .. }
                | Self::Stop { .. }
                | Self::Remove { .. }
                | Self::Daemon { .. }
        )
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AID_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.code)
        }
    }
}

fn open_engine(home: Option<&Path>, needs_runtime: bool) -> Result<Engine, CliError> {
    let home = resolve_home(home);
    tracing::debug!("aid home: {}", home.display());
    let engine = Engine::new(home)?;
    if !needs_runtime || std::env::var("AID_SKIP_PREREQS").as_deref() == Ok("1") {
        return Ok(engine);
    }
    if engine.runtime_name() == "docker" {
        let missing = aid_runtime::check_docker_prereqs(&engine.config().docker_bin);
        if !missing.is_empty() {
            return Err(CliError {
                code: EXIT_FAILURE,
                msg: aid_runtime::format_missing(&missing),
            });
        }
    }
    if !engine.runtime_available() {
        return Err(CliError {
            code: EXIT_FAILURE,
            msg: format!(
                "container engine '{}' is not reachable, is its daemon running?",
                engine.runtime_name()
            ),
        });
    }
    Ok(engine)
}

fn run(cli: Cli) -> commands::CmdResult {
    let json = cli.json;
    let needs_runtime = cli.command.needs_runtime();
    let home = cli.home;
    let open = || open_engine(home.as_deref(), needs_runtime);

    match cli.command {
        Commands::Build { reference, rebuild } => {
            commands::build::run(&open()?, &reference, rebuild, json)
        }
        Commands::Create { image, port } => {
            commands::create::run(&open()?, &image, port.as_deref(), json)
        }
        Commands::Start { container } => commands::start::run(&open()?, &container, json),
        Commands::Stop { container } => commands::stop::run(&open()?, &container, json),
        Commands::Remove { kind, id, yes } => {
            commands::remove::run(&open()?, &kind, &id, yes, json)
        }
        Commands::List { kind } => commands::list::run(&open()?, &kind, json),
        Commands::Inspect { kind, id } => commands::inspect::run(&open()?, &kind, &id, json),
        Commands::Env {
            reference,
            environment,
            set,
            unset,
        } => commands::env::run(
            &open()?,
            &reference,
            environment.as_deref(),
            &set,
            &unset,
            json,
        ),
        Commands::Generate { reference } => commands::generate::run(&open()?, &reference, json),
        Commands::Dockerfile { reference, set } => {
            commands::dockerfile::run(&open()?, &reference, set.as_deref(), json)
        }
        Commands::Logs { id } => commands::logs::run(&open()?, &id),
        Commands::Infer { container, params } => {
            commands::infer::run(&open()?, &container, &params)
        }
        Commands::Daemon { port } => commands::daemon::run(open()?, port),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    }
}
