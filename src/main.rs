//! mcpipe - command-line memcached client
//!
//! ```text
//! mcpipe [-c config.toml] <command> [args...]
//! ```
//!
//! Without `-c` the configuration comes from `MCPIPE_*` environment variables.

// Use jemalloc for better multi-threaded performance
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use anyhow::{Context, bail};
use mcpipe::backend::StoreMode;
use mcpipe::config::Config;
use mcpipe::pool::ClientPool;
use mcpipe::{Client, StoreOptions, Value};
use tokio::runtime::Builder;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: mcpipe [-c config.toml] <command> [args...]

commands:
  get KEY
  set|add|replace|append|prepend KEY VALUE [TTL]
  delete KEY
  incr|decr KEY [DELTA]
  touch KEY TTL
  stats [GROUP]
  flush [DELAY]
  hash KEY
  behaviors";

/// A parsed command line
#[derive(Debug, Clone)]
enum Command {
    Get(String),
    Store {
        mode: StoreMode,
        key: String,
        value: String,
        ttl: u32,
    },
    Delete(String),
    Counter {
        increment: bool,
        key: String,
        delta: i64,
    },
    Touch(String, u32),
    Stats(Option<String>),
    Flush(u32),
    Hash(String),
    Behaviors,
}

impl Command {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            bail!("{USAGE}");
        };
        let arg = |i: usize| -> anyhow::Result<String> {
            rest.get(i)
                .cloned()
                .with_context(|| format!("{name}: missing argument {}\n\n{USAGE}", i + 1))
        };

        let command = match name.as_str() {
            "get" => Self::Get(arg(0)?),
            "set" | "add" | "replace" | "append" | "prepend" => Self::Store {
                mode: match name.as_str() {
                    "set" => StoreMode::Set,
                    "add" => StoreMode::Add,
                    "replace" => StoreMode::Replace,
                    "append" => StoreMode::Append,
                    _ => StoreMode::Prepend,
                },
                key: arg(0)?,
                value: arg(1)?,
                ttl: optional_number(rest.get(2), "ttl")?.unwrap_or(0),
            },
            "delete" => Self::Delete(arg(0)?),
            "incr" | "decr" => Self::Counter {
                increment: name == "incr",
                key: arg(0)?,
                delta: optional_number(rest.get(1), "delta")?.unwrap_or(1),
            },
            "touch" => Self::Touch(
                arg(0)?,
                optional_number(rest.get(1), "ttl")?.context("touch: missing ttl")?,
            ),
            "stats" => Self::Stats(rest.first().cloned()),
            "flush" => Self::Flush(optional_number(rest.first(), "delay")?.unwrap_or(0)),
            "hash" => Self::Hash(arg(0)?),
            "behaviors" => Self::Behaviors,
            other => bail!("unknown command {other:?}\n\n{USAGE}"),
        };
        Ok(command)
    }
}

fn optional_number<T: std::str::FromStr>(
    arg: Option<&String>,
    what: &str,
) -> anyhow::Result<Option<T>> {
    arg.map(|s| {
        s.parse()
            .map_err(|_| anyhow::anyhow!("invalid {what}: {s:?}"))
    })
    .transpose()
}

/// Run one command and render its output
fn execute(client: &mut Client, command: &Command) -> mcpipe::Result<String> {
    let output = match command {
        Command::Get(key) => match client.get(key.as_str())? {
            Some(value) => value.to_string(),
            None => "(miss)".to_string(),
        },
        Command::Store {
            mode,
            key,
            value,
            ttl,
        } => {
            let options = StoreOptions::default().with_ttl(*ttl);
            let stored =
                client.store_with(*mode, key.as_str(), Value::from(value.as_str()), &options)?;
            if stored { "STORED" } else { "NOT_STORED" }.to_string()
        }
        Command::Delete(key) => {
            if client.delete(key.as_str())? { "DELETED" } else { "NOT_FOUND" }.to_string()
        }
        Command::Counter {
            increment,
            key,
            delta,
        } => {
            let value = if *increment {
                client.incr(key.as_str(), *delta)?
            } else {
                client.decr(key.as_str(), *delta)?
            };
            value.to_string()
        }
        Command::Touch(key, ttl) => {
            if client.touch(key.as_str(), *ttl)? { "TOUCHED" } else { "NOT_FOUND" }.to_string()
        }
        Command::Stats(group) => {
            let mut lines = Vec::new();
            for server in client.get_stats(group.as_deref())? {
                lines.push(format!("[{}]", server.label()));
                lines.extend(server.stats.iter().map(|(k, v)| format!("  {k} {v}")));
            }
            lines.join("\n")
        }
        Command::Flush(delay) => {
            client.flush_all(*delay)?;
            "OK".to_string()
        }
        Command::Hash(key) => client.hash(key.as_str())?.to_string(),
        Command::Behaviors => client
            .get_behaviors()
            .iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    Ok(output)
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();

    // Load configuration
    let config = if args.first().is_some_and(|a| a == "-c") {
        let path = args.get(1).cloned().context("-c needs a path")?;
        args.drain(..2);
        info!("Loading configuration from {}", path);
        Config::from_file(&path)?
    } else {
        debug!("Using environment configuration (set MCPIPE_* env vars to customize)");
        Config::from_env()
    };
    debug!("Configuration: {:?}", config);

    let command = Command::parse(&args)?;

    let runtime = Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async_main(config, command))
}

async fn async_main(config: Config, command: Command) -> anyhow::Result<()> {
    let client = Client::from_config(&config)?;
    let metrics = client.metrics().is_some();
    let pool = ClientPool::with_clients(&client, 1);

    let output = pool
        .run(move |client| {
            let output = execute(client, &command)?;
            let rendered = client.metrics().map(mcpipe::metrics::ClientMetrics::gather);
            Ok((output, rendered))
        })
        .await?;

    println!("{}", output.0);
    if metrics && let Some(rendered) = output.1 {
        eprintln!("{rendered}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert!(matches!(Command::parse(&args("get foo")).unwrap(), Command::Get(k) if k == "foo"));
        assert!(matches!(
            Command::parse(&args("add k v 30")).unwrap(),
            Command::Store { mode: StoreMode::Add, ttl: 30, .. }
        ));
        assert!(matches!(
            Command::parse(&args("decr k")).unwrap(),
            Command::Counter { increment: false, delta: 1, .. }
        ));
        assert!(matches!(Command::parse(&args("flush")).unwrap(), Command::Flush(0)));
        assert!(Command::parse(&args("touch k")).is_err());
        assert!(Command::parse(&args("set k")).is_err());
        assert!(Command::parse(&args("frobnicate")).is_err());
        assert!(Command::parse(&[]).is_err());
    }

    #[test]
    fn test_execute_in_memory() {
        let mut client = Client::in_memory().unwrap();
        let run = |client: &mut Client, line: &str| {
            execute(client, &Command::parse(&args(line)).unwrap()).unwrap()
        };
        assert_eq!(run(&mut client, "set n 41"), "STORED");
        assert_eq!(run(&mut client, "add n 1"), "NOT_STORED");
        assert_eq!(run(&mut client, "incr n"), "42");
        assert_eq!(run(&mut client, "get n"), "42");
        assert_eq!(run(&mut client, "delete n"), "DELETED");
        assert_eq!(run(&mut client, "get n"), "(miss)");
        assert!(run(&mut client, "behaviors").contains("hash = default"));
    }
}
