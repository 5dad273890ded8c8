//! orchestra-sim: 在模拟提供商上驱动编排层的命令行工具
//!
//! Usage:
//!   orchestra-sim run [--config <path>] [--requests <n>] [--users <n>] [--fail <provider>=<rate>]...
//!   orchestra-sim classify <message> [--status <code>]
//!   orchestra-sim config [--config <path>]

use ai_orchestra::models::{HandleFactory, ModelSpec};
use ai_orchestra::resilience::classifier::classify_message;
use ai_orchestra::telemetry::{init_tracing, InMemoryEventSink};
use ai_orchestra::usage::AnalyticsPeriod;
use ai_orchestra::{
    Dispatch, Error, OrchestrationRequest, OrchestratorBuilder, OrchestratorConfig, TokenUsage,
    WithUsage,
};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const ROUTES: &[(&str, &str)] = &[
    ("openai", "gpt-4o"),
    ("anthropic", "claude-3-5-sonnet"),
    ("local", "llama-3-8b"),
];

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let code = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "classify" => cmd_classify(&args[2..]),
        "config" => cmd_config(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("orchestra-sim {}", env!("CARGO_PKG_VERSION"));
            0
        }
        "help" | "--help" | "-h" => {
            print_usage();
            0
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            1
        }
    };
    std::process::exit(code);
}

fn print_usage() {
    println!(
        r#"orchestra-sim: 编排层模拟工具

USAGE:
    orchestra-sim <COMMAND> [OPTIONS]

COMMANDS:
    run                         Drive simulated traffic through the orchestrator
        --config <path>         YAML or JSON configuration file
        --requests <n>          Number of requests (default 50)
        --users <n>             Number of distinct users (default 3)
        --fail <provider>=<r>   Failure rate 0..1 for a simulated provider (repeatable)
    classify <message>          Classify an error message
        --status <code>         HTTP status accompanying the message
    config                      Print the effective configuration
    version                     Show version information
    help                        Show this help message

ENVIRONMENT:
    AI_ORCHESTRA_*              Configuration overrides (e.g. AI_ORCHESTRA_RATE_LIMIT)
    RUST_LOG                    Log filter (default ai_orchestra=info)"#
    );
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn load_config(args: &[String]) -> Result<OrchestratorConfig, Error> {
    let config = match flag_value(args, "--config") {
        Some(path) => OrchestratorConfig::from_path(PathBuf::from(path))?,
        None => OrchestratorConfig::default(),
    };
    config.apply_env_overrides()
}

fn cmd_config(args: &[String]) -> i32 {
    match load_config(args).and_then(|c| serde_yaml::to_string(&c).map_err(Error::from)) {
        Ok(yaml) => {
            print!("{yaml}");
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

fn cmd_classify(args: &[String]) -> i32 {
    let Some(message) = args.first().filter(|a| !a.starts_with("--")) else {
        eprintln!("usage: orchestra-sim classify <message> [--status <code>]");
        return 1;
    };
    let status = flag_value(args, "--status").and_then(|s| s.parse::<u16>().ok());
    let verdict = classify_message(status, message);
    println!(
        "kind={} retryable={} trips_breaker={}",
        verdict.kind,
        verdict.retryable,
        verdict.kind.trips_breaker()
    );
    0
}

/// Binding handed to the operation: the provider id plus its failure rate.
struct SimBackend {
    provider: String,
    fail_rate: f64,
}

struct SimFactory {
    fail_rates: HashMap<String, f64>,
}

#[async_trait]
impl HandleFactory for SimFactory {
    type Binding = SimBackend;

    async fn build(&self, spec: &ModelSpec) -> ai_orchestra::Result<SimBackend> {
        Ok(SimBackend {
            provider: spec.provider.clone(),
            fail_rate: self.fail_rates.get(&spec.provider).copied().unwrap_or(0.0),
        })
    }
}

fn parse_fail_rates(args: &[String]) -> HashMap<String, f64> {
    let mut rates = HashMap::new();
    for (i, arg) in args.iter().enumerate() {
        if arg != "--fail" {
            continue;
        }
        let Some((provider, rate)) = args.get(i + 1).and_then(|v| v.split_once('=')) else {
            continue;
        };
        if let Ok(rate) = rate.parse::<f64>() {
            rates.insert(provider.trim().to_ascii_lowercase(), rate.clamp(0.0, 1.0));
        }
    }
    rates
}

async fn simulate_call(backend: &SimBackend) -> ai_orchestra::Result<WithUsage<String>> {
    let (failed, latency_ms, pick, input, output) = {
        let mut rng = rand::thread_rng();
        (
            rng.gen_bool(backend.fail_rate),
            rng.gen_range(5..40u64),
            rng.gen_range(0..3u8),
            rng.gen_range(200..2000u64),
            rng.gen_range(50..800u64),
        )
    };
    tokio::time::sleep(std::time::Duration::from_millis(latency_ms)).await;
    if failed {
        let (status, message) = match pick {
            0 => (503, "service unavailable"),
            1 => (429, "rate limit exceeded"),
            _ => (500, "internal server error"),
        };
        return Err(Error::provider_status(status, format!("{}: {}", backend.provider, message)));
    }
    Ok(WithUsage::new(
        format!("ok from {}", backend.provider),
        TokenUsage::new(input, output),
    ))
}

async fn cmd_run(args: &[String]) -> i32 {
    init_tracing();

    let config = match load_config(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };
    let requests: usize = flag_value(args, "--requests")
        .and_then(|v| v.parse().ok())
        .unwrap_or(50);
    let users: usize = flag_value(args, "--users")
        .and_then(|v| v.parse().ok())
        .unwrap_or(3)
        .max(1);

    let sink = Arc::new(InMemoryEventSink::new(requests * 4));
    let orchestrator = match OrchestratorBuilder::new(SimFactory {
        fail_rates: parse_fail_rates(args),
    })
    .config(config)
    .event_sink(sink.clone())
    .build()
    {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let calls = (0..requests).map(|i| {
        let mut request = OrchestrationRequest::new(format!("user-{}", i % users), "simulate");
        for (provider, model) in ROUTES {
            request = request.route(provider, model);
        }
        let orchestrator = &orchestrator;
        async move {
            orchestrator
                .execute(request, |handle| async move {
                    simulate_call(handle.binding()).await
                })
                .await
        }
    });
    let results = futures::future::join_all(calls).await;

    let mut completed: HashMap<String, usize> = HashMap::new();
    let (mut limited, mut failed) = (0usize, 0usize);
    for result in results {
        match result {
            Ok(Dispatch::Completed(done)) => *completed.entry(done.provider).or_default() += 1,
            Ok(Dispatch::RateLimited { .. }) => limited += 1,
            Err(_) => failed += 1,
        }
    }

    println!("requests:      {requests}");
    let mut served: Vec<_> = completed.into_iter().collect();
    served.sort();
    for (provider, n) in served {
        println!("  served by {provider:<10} {n}");
    }
    println!("rate limited:  {limited}");
    println!("exhausted:     {failed}");

    for u in 0..users {
        let user = format!("user-{u}");
        let status = orchestrator.status(&user).await;
        let summary = orchestrator.summary(&user, AnalyticsPeriod::All);
        println!(
            "{user}: balance {:.4}{} used {:.4} events {} alerts [{}]",
            status.balance,
            if status.overdrawn { " (OVERDRAWN)" } else { "" },
            status.total_used,
            summary.events,
            status
                .alerts
                .iter()
                .map(|a| a.name())
                .collect::<Vec<_>>()
                .join(",")
        );
    }

    let signals = orchestrator.signals(None);
    println!(
        "resolver: {} cached, {} builds; open circuits: [{}]; events recorded: {}",
        signals.resolver.cached,
        signals.resolver.builds,
        signals.open_circuits().join(","),
        sink.len()
    );
    0
}
