use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::admission::Gate;
use turnstile::config::TurnstileConfig;
use turnstile::identity::{CallerIdentity, ResourceType, SubscriptionTier};
use turnstile::ledger::SystemClock;
use turnstile::upstream::mocks::ScriptedProvider;
use turnstile::upstream::{GenerationProvider, GenerationRequest, UpstreamGateway};

/// Admission control and upstream resilience for content generation.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// YAML configuration file; `TURNSTILE__*` variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the resolved quota policy table as JSON
    Policies,
    /// Run a burst of requests through the admission gate
    Simulate(SimulateArgs),
}

#[derive(Debug, Args)]
struct SimulateArgs {
    /// Caller token; a network address for anonymous callers, a user id otherwise
    #[arg(long)]
    identity: String,

    /// Subscription tier
    #[arg(long, default_value = "free")]
    tier: SubscriptionTier,

    /// Resource type
    #[arg(long, default_value = "text-generation")]
    resource: ResourceType,

    /// Number of sequential requests
    #[arg(long, default_value_t = 1)]
    requests: u32,

    /// Prompt sent with each request
    #[arg(long, default_value = "Tell me a short story")]
    prompt: String,

    /// Answer from a canned echo provider instead of the configured upstream
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = TurnstileConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Policies => {
            let table = config.policy_table()?;
            println!("{}", serde_json::to_string_pretty(&table.rows())?);
        }
        Command::Simulate(args) => simulate(&config, args).await?,
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn simulate(config: &TurnstileConfig, args: SimulateArgs) -> anyhow::Result<()> {
    info!("Starting Turnstile simulation");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let provider: Arc<dyn GenerationProvider> = if args.offline {
        Arc::new(ScriptedProvider::always_ok(format!("echo: {}", args.prompt)))
    } else {
        Arc::new(config.upstream.provider())
    };
    let gateway = UpstreamGateway::new(provider)
        .with_config(config.upstream.gateway_config())
        .with_fallbacks(config.fallback_catalog());

    let ledger = config.ledger.connect().await?;
    let policies = Arc::new(config.policy_table()?);
    let gate = Gate::with_options(
        ledger,
        policies,
        gateway,
        Arc::new(SystemClock::new()),
        config.authentication.successful_attempts,
    );

    let identity = match args.tier {
        SubscriptionTier::Anonymous => CallerIdentity::anonymous(&args.identity),
        _ => CallerIdentity::user(&args.identity),
    };
    let request = GenerationRequest::new(&args.prompt);
    info!(
        identity = %identity,
        tier = %args.tier,
        resource = %args.resource,
        requests = args.requests,
        "Simulating requests"
    );

    for n in 1..=args.requests {
        let line = match gate
            .handle(&identity, args.tier, args.resource, &request)
            .await
        {
            Ok(admitted) => serde_json::json!({ "request": n, "admitted": admitted }),
            Err(rejection) => serde_json::json!({
                "request": n,
                "status": rejection.status_code(),
                "rejected": rejection,
            }),
        };
        println!("{}", line);
    }

    let usage = gate
        .accountant()
        .remaining(&identity, args.resource, args.tier)
        .await;
    println!("{}", serde_json::json!({ "usage": usage }));

    Ok(())
}
