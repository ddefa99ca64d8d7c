use anyhow::Context;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{
    EnvFilter, fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt,
};
use veriface::{
    AppState, ConfigManager, RegistrySource, TursoClient, VerifaceConfig,
    agents::AgentRegistry,
    api::routes::create_router,
    build_pipeline,
    cli::{AgentCommands, Cli, Commands, mime_from_path, output::Output},
    types::{IdentifyRequest, UserContext},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let loaded = VerifaceConfig::load(&cli.config);
    init_tracing(&cli, loaded.as_ref().ok());

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            output.error(&format!("Failed to load {}: {}", cli.config.display(), e));
            output.hint("Copy veriface.toml.example to veriface.toml and set the API token env var.");
            std::process::exit(1);
        }
    };

    match cli.command {
        None => serve(&cli.config, &output).await,
        Some(Commands::Config { full, validate }) => show_config(&config, full, validate, &output),
        Some(Commands::Agent(AgentCommands::List)) => list_agents(&config, &output).await,
        Some(Commands::Agent(AgentCommands::Sync)) => sync_agents(&config, &output).await,
        Some(Commands::Identify {
            image,
            question,
            user_id,
            user_type,
        }) => {
            identify(
                &config,
                &image,
                question,
                UserContext::new(user_id, user_type),
                &output,
            )
            .await
        }
        #[cfg(feature = "mcp")]
        Some(Commands::Mcp) => mcp_server(&config).await,
    }
}

fn init_tracing(cli: &Cli, config: Option<&VerifaceConfig>) {
    let default_level = if cli.verbose {
        "debug"
    } else {
        config.map(|c| c.server.log_level.as_str()).unwrap_or("info")
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "veriface={lvl},veriface_server={lvl},tower_http={lvl}",
            lvl = default_level
        ))
    });

    // Protocol commands keep stdout for the protocol stream.
    let to_stderr = cli.command.as_ref().is_some_and(|c| c.owns_stdout());
    let writer = || {
        if to_stderr {
            BoxMakeWriter::new(std::io::stderr)
        } else {
            BoxMakeWriter::new(std::io::stdout)
        }
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer()))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(!cli.no_color && !to_stderr)
                    .with_writer(writer()),
            )
            .init();
    }
}

async fn serve(config_path: &Path, output: &Output) -> anyhow::Result<()> {
    output.banner();

    let mut config_manager =
        ConfigManager::new(config_path).context("Failed to load configuration")?;
    if let Err(e) = config_manager.start_watching() {
        tracing::warn!("Config hot reload disabled: {}", e);
    }
    let config_manager = Arc::new(config_manager);
    let config = config_manager.config();

    for warning in config.validate_with_warnings()? {
        tracing::warn!("{}", warning);
    }

    let state = AppState::from_config_manager(config_manager.clone()).await?;
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(
        agents = config.active_agents().len(),
        registry = ?config.registry.source,
        threshold = config.fusion.threshold,
        margin = config.fusion.margin,
        "Listening on http://{}",
        addr
    );
    output.info(&format!("Health check: http://{}/health", addr));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

fn show_config(
    config: &VerifaceConfig,
    full: bool,
    validate: bool,
    output: &Output,
) -> anyhow::Result<()> {
    output.header("Configuration");
    output.kv(
        "server",
        &format!("{}:{}", config.server.host, config.server.port),
    );
    output.kv("database", &config.database.url);
    output.kv("registry", &format!("{:?}", config.registry.source).to_lowercase());
    output.kv(
        "fusion",
        &format!(
            "threshold {} / margin {}",
            config.fusion.threshold, config.fusion.margin
        ),
    );
    output.kv(
        "dispatch",
        &format!(
            "timeout {}ms, tolerates {} failure(s)",
            config.dispatch.timeout_ms, config.dispatch.max_tolerated_failures
        ),
    );
    output.kv(
        "qa",
        &format!("{} (timeout {}ms)", config.qa.url, config.qa.timeout_ms),
    );
    output.kv(
        "agents",
        &format!(
            "{} configured, {} active",
            config.agents.len(),
            config.active_agents().len()
        ),
    );

    if full {
        output.header("Agents");
        output.agents(&config.agent_descriptors());
        output.header("Resolved TOML");
        println!("{}", toml::to_string_pretty(config)?);
    }

    if validate {
        output.header("Validation");
        let warnings = config.validate_with_warnings()?;
        if warnings.is_empty() {
            output.success("Configuration is valid");
        } else {
            for warning in &warnings {
                output.warning(&warning.message);
            }
        }
    }

    Ok(())
}

async fn list_agents(config: &VerifaceConfig, output: &Output) -> anyhow::Result<()> {
    let agents = match config.registry.source {
        RegistrySource::Config => config.active_agents(),
        RegistrySource::Database => {
            TursoClient::from_config(config)
                .await?
                .list_active_agents()
                .await?
        }
    };

    output.header("Active agents");
    output.agents(&agents);
    Ok(())
}

async fn sync_agents(config: &VerifaceConfig, output: &Output) -> anyhow::Result<()> {
    let db = TursoClient::from_config(config).await?;

    for agent in config.agent_descriptors() {
        db.upsert_agent(&agent).await?;
        output.success(&format!("Synced {}", agent.name));
    }

    output.info(&format!("{} agent(s) in database", db.list_agents().await?.len()));
    if config.registry.source == RegistrySource::Config {
        output.hint("Set registry.source = \"database\" to dispatch against the synced table.");
    }
    Ok(())
}

async fn identify(
    config: &VerifaceConfig,
    image_path: &Path,
    question: Option<String>,
    user: UserContext,
    output: &Output,
) -> anyhow::Result<()> {
    let image = tokio::fs::read(image_path)
        .await
        .with_context(|| format!("Failed to read {}", image_path.display()))?;

    let db = Arc::new(TursoClient::from_config(config).await?);
    let config_manager = Arc::new(ConfigManager::from_config(config.clone()));
    let registry = veriface::agent_registry(config, &config_manager, &db);
    let pipeline = build_pipeline(config, registry, db.clone())?;

    let mut request = IdentifyRequest::new(image).with_user(user);
    request.question = question;
    request.mime_type = mime_from_path(image_path).map(str::to_string);

    let result = pipeline.handle(request).await?;
    output.verdict(&result);
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

#[cfg(feature = "mcp")]
async fn mcp_server(config: &VerifaceConfig) -> anyhow::Result<()> {
    let db = Arc::new(TursoClient::from_config(config).await?);
    let config_manager = Arc::new(ConfigManager::from_config(config.clone()));
    let registry = veriface::agent_registry(config, &config_manager, &db);
    let pipeline = build_pipeline(config, registry, db.clone())?;

    tracing::info!(
        agents = config.active_agents().len(),
        "Serving MCP tools over stdio"
    );
    veriface::mcp::start_stdio_server(Arc::new(pipeline)).await?;

    tracing::info!("MCP client disconnected");
    Ok(())
}
