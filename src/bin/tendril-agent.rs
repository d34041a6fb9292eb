//! Tendril agent - connects to a controller and serves its instruction trees
//!
//! The root object exposes a few built-in methods so a controller can check
//! the round trip end to end:
//! - `log(...)` writes its arguments to the agent log
//! - `after(ms, value)` returns a deferred value that resolves to `value`
//!   after `ms` milliseconds
//! - `version` is the agent version string

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tendril::interpreter::Deferred;
use tendril::runtime::error::EvalError;
use tendril::runtime::{AgentConfig, Pipeline, TcpTransport};
use tendril::{PropertyBag, Value};

#[derive(Parser)]
#[command(name = "tendril-agent")]
#[command(about = "Agent side of the Tendril remote-execution protocol", long_about = None)]
struct Cli {
    /// Controller URL (tcp://host:port)
    #[arg(long)]
    url: Option<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum characters per frame
    #[arg(long)]
    frame_limit: Option<usize>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    reconnect_limit: Option<u32>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => AgentConfig::default(),
        };
        if let Some(url) = self.url {
            config.url = url;
        }
        if let Some(frame_limit) = self.frame_limit {
            config.frame_limit = frame_limit;
        }
        if let Some(reconnect_limit) = self.reconnect_limit {
            config.reconnect_limit = reconnect_limit;
        }
        config.debug |= self.debug;
        config.validate()?;
        Ok(config)
    }
}

fn root_object() -> Value {
    let bag = PropertyBag::new("agent root")
        .with("version", Value::from(tendril::VERSION))
        .with_method("log", |_this, args| {
            let line: Vec<String> = args.iter().map(Value::describe).collect();
            tracing::info!(target: "tendril::console", "{}", line.join(" "));
            Ok(Value::Null)
        })
        .with_method("after", |_this, args| {
            let millis = args
                .first()
                .and_then(Value::as_f64)
                .filter(|ms| *ms >= 0.0)
                .ok_or_else(|| EvalError::host("after expects a delay in milliseconds"))?;
            let value = args.get(1).cloned().unwrap_or(Value::Null);
            let deferred = Deferred::new();
            let pending = deferred.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(millis as u64)).await;
                if let Err(err) = pending.resolve(value) {
                    tracing::warn!(error = %err, "deferred already settled");
                }
            });
            Ok(Value::Deferred(deferred))
        });
    Value::host(bag)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    // Initialize tracing
    let level = if config.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(url = %config.url, frame_limit = config.frame_limit, "starting agent");
    let pipeline = Pipeline::new(config, TcpTransport::new(), root_object());

    let runner = pipeline.clone();
    tokio::select! {
        result = runner.run() => result.context("agent connection failed")?,
        _ = tokio::signal::ctrl_c() => {
            pipeline.halt();
            println!("Interrupted; connection halted");
        }
    }
    Ok(())
}
