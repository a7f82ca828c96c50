use std::path::{Path, PathBuf};

use clap::Parser;
use saml_strategy::{
    auth::{BoxError, Profile, SamlStrategy, Verified, verify_fn},
    config::AppConfig,
    observability,
    routes::{self, AppState},
};

/// Config file picked up from the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "saml-strategy.toml";

/// CLI arguments for the demo SAML service provider
#[derive(Parser, Debug)]
#[command(version, about = "SAML 2.0 service provider", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./saml-strategy.toml if it exists)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the service provider (default)
    Serve,
    /// Print service provider metadata
    Metadata {
        /// PEM certificate advertised for assertion encryption
        #[arg(long)]
        decryption_cert: Option<PathBuf>,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        None | Some(Command::Serve) => run_server(args.config.as_deref()).await,
        Some(Command::Metadata {
            decryption_cert,
            output,
        }) => run_metadata_export(args.config.as_deref(), decryption_cert, output),
    }
}

fn load_config(explicit_path: Option<&str>) -> AppConfig {
    let path = match explicit_path {
        Some(path) => PathBuf::from(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => PathBuf::from(DEFAULT_CONFIG_FILE),
        None => return AppConfig::default(),
    };

    match AppConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

/// Strategy whose verify step accepts every asserted subject as the local user.
fn build_strategy(config: &AppConfig) -> SamlStrategy<Profile> {
    let built = SamlStrategy::builder()
        .config(config.saml.clone())
        .verify(verify_fn(|_request, profile: Profile| {
            Box::pin(async move {
                if profile.name_id.is_empty() {
                    return Ok::<_, BoxError>(Verified::rejected(None));
                }
                Ok(Verified::user(profile))
            })
        }))
        .build();

    match built {
        Ok(strategy) => strategy,
        Err(e) => {
            eprintln!("Failed to build SAML strategy: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {e}");
        std::process::exit(1);
    }

    let strategy = build_strategy(&config);
    tracing::info!(
        entry_point = %config.saml.entry_point,
        issuer = %config.saml.issuer,
        binding = config.saml.authn_request_binding.as_str(),
        "SAML strategy ready"
    );

    let app = routes::build_router(AppState::new(strategy, &config.server));
    let addr = config.server.socket_addr();

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "Failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

fn run_metadata_export(
    explicit_config_path: Option<&str>,
    decryption_cert: Option<PathBuf>,
    output: Option<String>,
) {
    let config = load_config(explicit_config_path);
    let strategy = build_strategy(&config);

    let decryption_cert = match decryption_cert.map(std::fs::read_to_string).transpose() {
        Ok(cert) => cert,
        Err(e) => {
            eprintln!("Failed to read decryption certificate: {e}");
            std::process::exit(1);
        }
    };
    let xml = strategy.generate_service_provider_metadata(decryption_cert.as_deref());

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &xml) {
                eprintln!("Failed to write metadata to {path}: {e}");
                std::process::exit(1);
            }
            eprintln!("Service provider metadata written to {path}");
        }
        None => println!("{xml}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
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

    tracing::info!("Shutdown signal received");
}
