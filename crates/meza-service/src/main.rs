use clap::{Parser, ValueEnum};
use meza_adapters::{DarajaConfig, DarajaGateway, MockLedger, MockStkGateway};
use meza_core::{LedgerClient, StkGateway, StoreConfig};
use meza_service::watcher::spawn_store_watcher;
use meza_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GatewayMode {
    Mock,
    Daraja,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LedgerMode {
    Mock,
}

#[derive(Debug, Parser)]
#[command(name = "mezad", version, about = "Meza custody REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
    /// Document store backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StoreMode::Auto, env = "MEZA_STORE")]
    store: StoreMode,
    /// PostgreSQL url for user/group/deposit record persistence.
    #[arg(long, env = "MEZA_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "MEZA_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Mobile-money gateway. `mock` accepts every charge locally.
    #[arg(long, value_enum, default_value_t = GatewayMode::Mock, env = "MEZA_GATEWAY")]
    gateway: GatewayMode,
    /// Ledger backend. Only the in-process simulation is wired so far.
    #[arg(long, value_enum, default_value_t = LedgerMode::Mock, env = "MEZA_LEDGER")]
    ledger: LedgerMode,
    /// Hex seed of the custody signing credential.
    #[arg(long, env = "MEZA_CUSTODY_SECRET", hide_env_values = true)]
    custody_secret: Option<String>,
    /// Public URL the gateway posts charge results to.
    #[arg(
        long,
        env = "MEZA_CALLBACK_URL",
        default_value = "http://127.0.0.1:8080/v1/deposits/callback"
    )]
    callback_url: String,
    /// Daraja API base url.
    #[arg(long, env = "MPESA_BASE_URL", default_value = "https://sandbox.safaricom.co.ke")]
    mpesa_base_url: String,
    #[arg(long, env = "MPESA_CONSUMER_KEY")]
    mpesa_consumer_key: Option<String>,
    #[arg(long, env = "MPESA_CONSUMER_SECRET", hide_env_values = true)]
    mpesa_consumer_secret: Option<String>,
    #[arg(long, env = "MPESA_SHORT_CODE")]
    mpesa_short_code: Option<String>,
    #[arg(long, env = "MPESA_PASSKEY", hide_env_values = true)]
    mpesa_passkey: Option<String>,
}

fn resolve_store(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let store = match cli.store {
        StoreMode::Memory => StoreConfig::Memory,
        StoreMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("store=postgres requires --database-url or DATABASE_URL")
            })?;
            StoreConfig::postgres(database_url, cli.pg_max_connections)
        }
        StoreMode::Auto => {
            if let Some(database_url) = resolved_url {
                StoreConfig::postgres(database_url, cli.pg_max_connections)
            } else {
                StoreConfig::Memory
            }
        }
    };

    Ok(store)
}

fn resolve_ledger(cli: &Cli) -> Arc<dyn LedgerClient> {
    match cli.ledger {
        LedgerMode::Mock => {
            warn!("ledger=mock: transactions settle against an in-process simulation");
            Arc::new(MockLedger::new())
        }
    }
}

fn resolve_gateway(cli: &Cli) -> anyhow::Result<Arc<dyn StkGateway>> {
    match cli.gateway {
        GatewayMode::Mock => Ok(Arc::new(MockStkGateway::new())),
        GatewayMode::Daraja => {
            let require = |value: &Option<String>, name: &str| {
                value
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("gateway=daraja requires {name}"))
            };
            let config = DarajaConfig {
                base_url: cli.mpesa_base_url.clone(),
                consumer_key: require(&cli.mpesa_consumer_key, "MPESA_CONSUMER_KEY")?,
                consumer_secret: require(&cli.mpesa_consumer_secret, "MPESA_CONSUMER_SECRET")?,
                short_code: require(&cli.mpesa_short_code, "MPESA_SHORT_CODE")?,
                passkey: require(&cli.mpesa_passkey, "MPESA_PASSKEY")?,
            };
            Ok(Arc::new(DarajaGateway::new(config)?))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "meza_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let store = resolve_store(&cli)?;
    let ledger = resolve_ledger(&cli);
    let gateway = resolve_gateway(&cli)?;

    let config = ServiceConfig {
        store,
        custody_secret: cli.custody_secret.clone(),
        callback_url: cli.callback_url.clone(),
        ..ServiceConfig::default()
    };
    let state = ServiceState::bootstrap_with(config, ledger, gateway).await?;

    let _watcher = spawn_store_watcher(state.engine.clone(), state.engine.store().subscribe());

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(
        store = state.engine.store().backend_label(),
        "meza-service REST listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app).await?;
    Ok(())
}
