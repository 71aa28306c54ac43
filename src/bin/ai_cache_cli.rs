//! ai-cache-cli: 通过缓存/重试执行器发送提示词并查看缓存统计的命令行工具
//!
//! Usage:
//!   ai-cache-cli ask <prompt> [--model <m>] [--base-url <url>] [--config <file>]
//!                             [--repeat <n>] [--concurrency <n>]
//!   ai-cache-cli purge [--config <file>]       Drop expired entries from the disk cache
//!   ai-cache-cli config [--config <file>]      Print the effective configuration

use ai_response_cache::{ExecutorConfig, HttpTransport, RequestDescriptor, RequestExecutor};
use anyhow::{bail, Context};
use futures::future::join_all;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "ask" => cmd_ask(&args[2..]).await,
        "purge" => cmd_purge(&args[2..]).await,
        "config" => cmd_config(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("ai-cache-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"ai-cache-cli: cached, retrying AI requests

USAGE:
    ai-cache-cli <COMMAND> [OPTIONS]

COMMANDS:
    ask <prompt>        Send a prompt through the executor (twice by default)
        --model <m>         Model parameter (default: $AI_MODEL or gpt-4o-mini)
        --base-url <url>    OpenAI-compatible base URL (default: OpenAI)
        --repeat <n>        Sequential executions (default: 2)
        --concurrency <n>   Identical requests fired at once per round (default: 1)
    purge               Drop expired entries from the configured disk cache
    config              Print the effective configuration as YAML
    version             Show version information
    help                Show this help message

COMMON OPTIONS:
    --config <file>     YAML config file; AI_* env vars still apply on top

ENVIRONMENT:
    OPENAI_API_KEY      Bearer token for the default endpoint
    AI_API_KEY          Bearer token when --base-url is given
    RUST_LOG            Log filter (e.g. ai_response_cache=debug)"#
    );
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parse_flag<T: std::str::FromStr>(args: &[String], name: &str, default: T) -> anyhow::Result<T> {
    match flag(args, name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {name}: {raw}")),
        None => Ok(default),
    }
}

fn load_config(args: &[String]) -> anyhow::Result<ExecutorConfig> {
    let base = match flag(args, "--config") {
        Some(path) => ExecutorConfig::from_file(path)
            .with_context(|| format!("loading config from {path}"))?,
        None => ExecutorConfig::default(),
    };
    let cfg = base.overlay(|name| std::env::var(name).ok());
    cfg.validate()?;
    Ok(cfg)
}

async fn cmd_ask(args: &[String]) -> anyhow::Result<()> {
    let Some(prompt) = args.first().filter(|a| !a.starts_with("--")) else {
        bail!("ask requires a prompt");
    };
    let cfg = load_config(args)?;
    let repeat: usize = parse_flag(args, "--repeat", 2)?;
    let concurrency: usize = parse_flag(args, "--concurrency", 1)?;
    let model = flag(args, "--model")
        .map(str::to_string)
        .or_else(|| std::env::var("AI_MODEL").ok())
        .unwrap_or_else(|| "gpt-4o-mini".to_string());

    let transport = match flag(args, "--base-url") {
        Some(url) => {
            let t = HttpTransport::new(url)?;
            match std::env::var("AI_API_KEY") {
                Ok(key) => t.with_api_key(key),
                Err(_) => t,
            }
        }
        None => HttpTransport::openai()?,
    };
    let executor = cfg.build_executor(Arc::new(transport)).await?;
    let request = RequestDescriptor::new(prompt.as_str())
        .with_param("model", model)
        .with_param("temperature", 0);

    for round in 1..=repeat.max(1) {
        let calls = (0..concurrency.max(1)).map(|_| executor.execute(&request));
        for (i, res) in join_all(calls).await.into_iter().enumerate() {
            match res {
                Ok(resp) => println!(
                    "[{round}.{i}] cached={} attempts={} latency={}ms\n{}\n",
                    resp.cached, resp.attempts, resp.latency_ms, resp.content
                ),
                Err(e) => println!("[{round}.{i}] error ({}): {e}\n", e.class()),
            }
        }
    }

    print_stats(&executor).await
}

async fn print_stats(executor: &RequestExecutor) -> anyhow::Result<()> {
    let cache = executor.cache().stats().await?;
    let m = executor.metrics();
    println!("=== Cache ({}) ===", executor.cache().backend_name());
    println!(
        "hits={} misses={} sets={} evictions={} errors={} size={} hit_ratio={:.1}%",
        cache.hits,
        cache.misses,
        cache.sets,
        cache.evictions,
        cache.errors,
        cache.size,
        cache.hit_ratio() * 100.0
    );
    println!("=== Executor ({}) ===", executor.transport_name());
    println!(
        "requests={} cache_hits={} successful={} failed={} retries={} transport_attempts={} avg_latency={:.0}ms success_rate={:.1}%",
        m.total_requests,
        m.cache_hits,
        m.successful,
        m.failed,
        m.retry_attempts,
        m.transport_attempts,
        m.avg_latency_ms,
        m.success_rate() * 100.0
    );
    Ok(())
}

async fn cmd_purge(args: &[String]) -> anyhow::Result<()> {
    let cfg = load_config(args)?;
    if cfg.cache_dir.is_none() {
        bail!("purge needs a disk cache: set cache_dir in the config or AI_CACHE_DIR");
    }
    let cache = cfg.build_cache().await?;
    let removed = cache.purge_expired().await?;
    let left = cache.stats().await?.size;
    println!("removed {removed} expired entries, {left} remaining");
    Ok(())
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    let cfg = load_config(args)?;
    print!("{}", serde_yaml::to_string(&cfg)?);
    Ok(())
}
