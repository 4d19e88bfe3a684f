use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{Router, extract::Request};
use canopy::{
    adapters::{ConfigWatcher, GitCli, HttpClientAdapter, HttpHandler, ShellRuntime, middleware},
    config::{ConfigStore, LogFormat, Settings, load_settings},
    core::{
        Gateway,
        registry::{MiddlewareRegistry, ResourceRegistry},
        router::BindContext,
        service::ServiceManager,
    },
    ports::http_client::HttpClient,
    resources, tracing_setup,
    utils::GracefulShutdown,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use tower_http::trace::TraceLayer;

const DEFAULT_CONFIG: &str = "canopy.json";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway server (default)
    Serve(ServeArgs),
    /// Decode and convert a config file without starting anything
    Validate {
        /// Config file to validate
        #[clap(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Write a starter config file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Overwrite an existing file
        #[clap(long)]
        force: bool,
    },
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Gateway config file
    #[clap(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Process settings file (TOML, YAML, JSON or INI)
    #[clap(long)]
    settings: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8080
    #[clap(long)]
    listen: Option<String>,

    /// Override only the port of the listen address
    #[clap(short, long)]
    port: Option<u16>,

    /// Folder for service checkouts
    #[clap(long)]
    services: Option<PathBuf>,

    /// Reload when the config file changes on disk
    #[clap(long)]
    watch: bool,

    #[clap(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl ServeArgs {
    fn settings(&self) -> Result<Settings> {
        let mut settings = load_settings(self.settings.as_deref())?;
        if let Some(listen) = &self.listen {
            settings.listen_addr = listen.clone();
        }
        if let Some(port) = self.port {
            let mut addr: SocketAddr = settings
                .listen_addr
                .parse()
                .with_context(|| format!("Invalid listen address {}", settings.listen_addr))?;
            addr.set_port(port);
            settings.listen_addr = addr.to_string();
        }
        if let Some(services) = &self.services {
            settings.services_dir = services.clone();
        }
        if self.watch {
            settings.watch = true;
        }
        if let Some(format) = self.log_format {
            settings.log_format = format;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config, force }) => init_config_command(&config, force).await,
        Some(Commands::Serve(serve)) => serve_command(serve).await,
        None => serve_command(args.serve).await,
    }
}

/// Wire the registries, service manager and config store for `config_path`.
fn build_store(config_path: &Path, services_dir: &Path) -> Result<Arc<ConfigStore>> {
    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);

    let mut resource_registry = ResourceRegistry::new();
    resources::register_builtin(&mut resource_registry, http_client)
        .context("Failed to register built-in resources")?;

    let mut middleware_registry = MiddlewareRegistry::new();
    middleware::register_builtin(&mut middleware_registry)
        .context("Failed to register built-in middleware")?;

    let services = Arc::new(ServiceManager::new(
        services_dir,
        Arc::new(GitCli::new()),
        Arc::new(ShellRuntime::new()),
    ));

    Ok(Arc::new(ConfigStore::new(
        config_path,
        Arc::new(resource_registry),
        Arc::new(middleware_registry),
        services,
    )))
}

async fn serve_command(args: ServeArgs) -> Result<()> {
    let settings = args.settings()?;
    tracing_setup::init_with_format(settings.log_format)?;

    tracing::info!(
        config = %args.config.display(),
        services_dir = %settings.services_dir.display(),
        "Loading initial configuration"
    );

    tokio::fs::create_dir_all(&settings.services_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create services directory {}",
                settings.services_dir.display()
            )
        })?;

    let store = build_store(&args.config, &settings.services_dir)?;
    let gateway = Gateway::new(store);

    let generation = gateway
        .reload()
        .await
        .with_context(|| format!("Failed to publish initial config {}", args.config.display()))?;
    tracing::info!(generation, "Initial router instance published");

    if settings.watch {
        let watcher = ConfigWatcher::new(&args.config).context("Failed to watch config file")?;
        tokio::spawn(watcher.reload_on_change(Arc::clone(&gateway)));
    }

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = Arc::clone(&graceful_shutdown);
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let http_handler = Arc::new(HttpHandler::new(Arc::clone(&gateway)));
    let app = Router::new()
        .fallback(move |req: Request| {
            let handler = Arc::clone(&http_handler);
            async move { handler.handle_request(req).await }
        })
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = settings
        .listen_addr
        .parse()
        .with_context(|| format!("Failed to parse listen address {}", settings.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address {addr}"))?;

    tracing::info!("Canopy gateway listening on {}", addr);

    let shutdown_waiter = Arc::clone(&graceful_shutdown);
    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = shutdown_waiter.wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received: {:?}", reason);
        })
        .await
        .context("Server error");

    gateway.shutdown().await;
    tracing::info!("Graceful shutdown completed");
    server_result
}

/// Decode the config and convert it into a router instance without starting
/// services or resources.
async fn validate_config_command(config_path: &Path) -> Result<()> {
    println!("🔍 Validating configuration file: {}", config_path.display());

    // Services are never built here, so the folder is not touched.
    let store = build_store(config_path, Path::new("./services"))?;
    let config = store
        .read()
        .await
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    println!("✅ Configuration parsing: OK");

    let instance = store
        .to_router_instance(&config, &BindContext::detached())
        .map_err(|e| eyre!("❌ Configuration validation failed: {e}"))?;

    println!("✅ Configuration validation: OK");
    println!();
    println!("📋 Configuration Summary:");
    println!("   • Last Updated: {}", config.last_updated);
    println!("   • Middleware: {}", config.middleware.join(", "));
    println!("   • Routes: {}", config.routes.len());
    println!("   • Bound handlers: {}", instance.table().len());
    println!("   • Services: {}", config.services.len());
    Ok(())
}

async fn init_config_command(config_path: &Path, force: bool) -> Result<()> {
    let config = ConfigStore::write_starter(config_path, force)
        .await
        .with_context(|| format!("Failed to write starter config {}", config_path.display()))?;

    println!("✅ Created {}", config_path.display());
    println!(
        "   The management API is mounted at {}",
        config
            .routes
            .first()
            .map(|route| route.route.as_str())
            .unwrap_or("/admin")
    );
    Ok(())
}
