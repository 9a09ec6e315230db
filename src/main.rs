use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cron_fleet::{
    config::Config,
    coordinator::FleetCoordinator,
    database::Database,
    events::{
        internal::{register_internal_events, seed_internal_events},
        ActionRegistry, Events,
    },
    models::{JobArgs, JobAttributes, JobFilters, JobStatus, DEFAULT_TENANT},
    store::{hash_action, JobStore},
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "cron-fleet")]
#[command(version = "0.1.0")]
#[command(about = "Multi-tenant cron coordination service")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web server and the coordination loop
    Serve {
        /// Listening IP address
        #[arg(short = 'H', long, value_name = "IP")]
        host: Option<String>,

        /// Listening port
        #[arg(short, long, value_name = "PORT")]
        port: Option<u16>,

        /// Database URL (overrides config file)
        #[arg(short = 'd', long, value_name = "URL")]
        database_url: Option<String>,
    },
    /// Register a job, updating in place when the identity already exists
    Schedule {
        #[arg(long, default_value_t = DEFAULT_TENANT)]
        tenant: i64,
        /// Scheduled unix time, seconds
        #[arg(long)]
        timestamp: i64,
        #[arg(long)]
        action: String,
        /// JSON array of callback arguments
        #[arg(long, default_value = "[]")]
        args: String,
        /// Recurrence interval in seconds
        #[arg(long)]
        interval: Option<i64>,
        /// Existing job id to update
        #[arg(long)]
        job_id: Option<i64>,
    },
    /// Execute a specific job through the execution gate
    Run {
        #[arg(long, default_value_t = DEFAULT_TENANT)]
        tenant: i64,
        #[arg(long)]
        timestamp: i64,
        /// Action name; hashed before resolution
        #[arg(long, conflicts_with = "action_hash")]
        action: Option<String>,
        /// Pre-hashed action, as emitted by the list endpoint
        #[arg(long)]
        action_hash: Option<String>,
        /// Hash of the job's argument set
        #[arg(long)]
        instance: String,
        /// Bypass the timestamp and lock checks (manual invocation)
        #[arg(long)]
        force: bool,
    },
    /// Mark a job completed by its dedup attributes
    Delete {
        #[arg(long, default_value_t = DEFAULT_TENANT)]
        tenant: i64,
        #[arg(long)]
        timestamp: i64,
        #[arg(long)]
        action: String,
        #[arg(long)]
        instance: String,
    },
    /// Mark a job completed by id
    DeleteById {
        #[arg(long, default_value_t = DEFAULT_TENANT)]
        tenant: i64,
        #[arg(long)]
        id: i64,
        #[arg(long)]
        flush_cache: bool,
    },
    /// Check whether a job exists for the given identity
    Exists {
        #[arg(long, default_value_t = DEFAULT_TENANT)]
        tenant: i64,
        #[arg(long)]
        timestamp: i64,
        #[arg(long)]
        action: String,
        #[arg(long)]
        instance: String,
        /// Print the job id instead of a boolean
        #[arg(long)]
        return_id: bool,
    },
    /// List jobs, soonest-due first
    List {
        #[arg(long, default_value_t = DEFAULT_TENANT)]
        tenant: i64,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        from: Option<i64>,
        #[arg(long)]
        to: Option<i64>,
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Fetch a single job by id or by its dedup attributes
    Get {
        #[arg(long, default_value_t = DEFAULT_TENANT)]
        tenant: i64,
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        timestamp: Option<i64>,
        #[arg(long)]
        instance: Option<String>,
        #[arg(long, conflicts_with = "action_hash")]
        action: Option<String>,
        #[arg(long)]
        action_hash: Option<String>,
    },
    /// Count jobs with a given status
    Count {
        #[arg(long, default_value_t = DEFAULT_TENANT)]
        tenant: i64,
        #[arg(long)]
        status: String,
    },
    /// Stop persisting new job records for the rest of this process (pair
    /// with resume-creation); does not affect an already-running server
    SuspendCreation,
    /// Resume persisting new job records in this process
    ResumeCreation,
    /// Drop this process's cached read results
    FlushCaches,
    /// Refresh this host's heartbeat and print its tenant slice, one JSON
    /// object per line, for consumption by an external runner
    OrchestrateList {
        #[arg(long, default_value_t = 60)]
        heartbeat_interval: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("cron_fleet={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(&cli.config)?;

    match cli.command {
        Command::Serve {
            host,
            port,
            database_url,
        } => {
            if let Some(host) = host {
                config.web.host = host;
            }
            if let Some(port) = port {
                config.web.port = port;
            }
            if let Some(database_url) = database_url {
                config.database.url = database_url;
            }
            serve(config).await
        }
        command => execute(config, command).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting cron-fleet v{}", env!("CARGO_PKG_VERSION"));
    info!("Using database: {}", config.database.url);

    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    let store = JobStore::new(database.clone());
    let registry = Arc::new(ActionRegistry::new());
    register_internal_events(&registry, &store, &config.execution).await;
    seed_internal_events(&store).await?;
    info!("Internal events registered and seeded");

    let events = Events::new(
        store.clone(),
        registry,
        config.execution.max_execution_time_secs,
    );

    let coordinator = FleetCoordinator::new(database, &config.coordinator);
    info!("Fleet coordinator initialized as host '{}'", coordinator.host_id());

    let loop_events = events.clone();
    tokio::spawn(async move {
        coordinator.start(loop_events).await;
    });

    let web_server = WebServer::new(&config.web, store, events)?;
    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    web_server.serve().await?;

    Ok(())
}

async fn execute(config: Config, command: Command) -> Result<()> {
    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    let store = JobStore::new(database.clone());

    match command {
        Command::Serve { .. } => unreachable!("handled by caller"),
        Command::Schedule {
            tenant,
            timestamp,
            action,
            args,
            interval,
            job_id,
        } => {
            let parsed: Vec<serde_json::Value> = serde_json::from_str(&args)?;
            let job_args = JobArgs {
                args: parsed,
                interval,
                schedule: None,
            };
            let result = store
                .for_tenant(tenant)
                .create_or_update(timestamp, &action, &job_args, job_id)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Run {
            tenant,
            timestamp,
            action,
            action_hash,
            instance,
            force,
        } => {
            let action_hash = match (action, action_hash) {
                (Some(action), None) => hash_action(&action),
                (None, Some(hash)) => hash,
                _ => anyhow::bail!("exactly one of --action or --action-hash is required"),
            };

            let registry = Arc::new(ActionRegistry::new());
            register_internal_events(&registry, &store, &config.execution).await;
            let events = Events::new(
                store.for_tenant(tenant),
                registry,
                config.execution.max_execution_time_secs,
            );

            let outcome = events.run(timestamp, &action_hash, &instance, force).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Delete {
            tenant,
            timestamp,
            action,
            instance,
        } => {
            let deleted = store
                .for_tenant(tenant)
                .mark_completed(timestamp, &action, &instance)
                .await?;
            println!("{}", serde_json::json!({ "deleted": deleted }));
        }
        Command::DeleteById {
            tenant,
            id,
            flush_cache,
        } => {
            let scoped = store.for_tenant(tenant);
            let deleted = scoped.mark_completed_by_id(id).await?;
            if flush_cache {
                scoped.flush_cache().await;
            }
            println!("{}", serde_json::json!({ "deleted": deleted }));
        }
        Command::Exists {
            tenant,
            timestamp,
            action,
            instance,
            return_id,
        } => {
            let id = store
                .for_tenant(tenant)
                .exists(timestamp, &action, &instance)
                .await?;
            if return_id {
                println!("{}", serde_json::json!({ "id": id }));
            } else {
                println!("{}", serde_json::json!({ "exists": id.is_some() }));
            }
        }
        Command::List {
            tenant,
            status,
            action,
            from,
            to,
            limit,
            offset,
        } => {
            let filters = JobFilters {
                status: status.as_deref().map(str::parse).transpose()?,
                action,
                timestamp_from: from,
                timestamp_to: to,
                limit: Some(limit),
                offset: Some(offset),
            };
            let jobs = store.for_tenant(tenant).list(&filters).await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        Command::Get {
            tenant,
            id,
            timestamp,
            instance,
            action,
            action_hash,
        } => {
            let attrs = JobAttributes {
                id,
                timestamp,
                instance_hash: instance,
                action,
                action_hash,
            };
            let job = store.for_tenant(tenant).get(&attrs).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Count { tenant, status } => {
            let status: JobStatus = status.parse()?;
            let count = store.for_tenant(tenant).count_by_status(status).await?;
            println!("{}", serde_json::json!({ "status": status, "count": count }));
        }
        Command::SuspendCreation => {
            store.suspend_creation();
            println!("{}", serde_json::json!({ "creation_suspended": true }));
        }
        Command::ResumeCreation => {
            store.resume_creation();
            println!("{}", serde_json::json!({ "creation_suspended": false }));
        }
        Command::FlushCaches => {
            store.flush_cache().await;
            println!("{}", serde_json::json!({ "flushed": true }));
        }
        Command::OrchestrateList { heartbeat_interval } => {
            let mut coordinator_config = config.coordinator.clone();
            coordinator_config.heartbeat_interval = heartbeat_interval;
            let coordinator = FleetCoordinator::new(database, &coordinator_config);

            for tenant in coordinator.orchestrate_list().await? {
                println!("{}", serde_json::to_string(&tenant)?);
            }
        }
    }

    Ok(())
}
