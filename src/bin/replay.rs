use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leadsync_lib::realtime::{
    CachePort, ConnectionSignal, EngineConfig, EngineError, EnginePorts, InvalidationTarget,
    LoopbackTransport, NotificationDescriptor, NotifyPort, PortError, RealtimeEngine,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{self, Instant};

const SETTLE_MARGIN: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ScriptStep {
    at_ms: u64,
    #[serde(flatten)]
    action: StepAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum StepAction {
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
    Signal {
        signal: ConnectionSignal,
    },
}

/// One JSON step per line. Blank lines and `#` comments are skipped; steps
/// are ordered by offset, ties keeping file order.
fn parse_script(raw: &str) -> Result<Vec<ScriptStep>, EngineError> {
    let mut steps = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step: ScriptStep = serde_json::from_str(line)
            .map_err(|e| EngineError::Parse(format!("line {}: {e}", index + 1)))?;
        steps.push(step);
    }
    steps.sort_by_key(|step| step.at_ms);
    Ok(steps)
}

struct LoggingCache;

#[async_trait]
impl CachePort for LoggingCache {
    async fn invalidate(&self, target: &InvalidationTarget) -> Result<(), PortError> {
        tracing::info!("cache invalidate {target}");
        Ok(())
    }
}

struct LoggingNotify;

impl NotifyPort for LoggingNotify {
    fn show(&self, descriptor: &NotificationDescriptor) -> Result<(), PortError> {
        tracing::info!(
            "toast [{}] {}: {}",
            descriptor.tone,
            descriptor.title,
            descriptor.body
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("replay failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let _ = dotenvy::dotenv();
    leadsync_lib::init_tracing();

    let mut script_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(());
        }
        if let Some(value) = arg.strip_prefix("--script=") {
            script_path = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--script" {
            let value = args
                .next()
                .ok_or_else(|| "--script requires a value".to_string())?;
            script_path = Some(PathBuf::from(value));
            continue;
        }
        if let Some(value) = arg.strip_prefix("--config=") {
            config_path = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--config" {
            let value = args
                .next()
                .ok_or_else(|| "--config requires a value".to_string())?;
            config_path = Some(PathBuf::from(value));
            continue;
        }
        return Err(format!("unknown argument '{arg}'. Use --help for usage"));
    }

    let script_path = script_path.ok_or_else(|| "--script is required".to_string())?;
    let mut config = match config_path {
        Some(path) => EngineConfig::from_json_file(&path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides();

    let raw = std::fs::read_to_string(&script_path)
        .map_err(|e| format!("failed to read {}: {e}", script_path.display()))?;
    let steps = parse_script(&raw).map_err(|e| e.to_string())?;
    tracing::info!("replaying {} step(s) from {}", steps.len(), script_path.display());

    let transport = Arc::new(LoopbackTransport::new());
    let mut engine = RealtimeEngine::mount(
        EnginePorts {
            transport: transport.clone(),
            cache: Arc::new(LoggingCache),
            notify: Arc::new(LoggingNotify),
        },
        config.clone(),
    )
    .map_err(|e| e.to_string())?;

    let start = Instant::now();
    for step in &steps {
        time::sleep_until(start + Duration::from_millis(step.at_ms)).await;
        match &step.action {
            StepAction::Event { event, payload } => {
                if transport.emit(event, payload.clone()) == 0 {
                    tracing::warn!(
                        "'{event}' at {}ms was not delivered (offline or not subscribed)",
                        step.at_ms
                    );
                }
            }
            StepAction::Signal { signal } => match signal {
                ConnectionSignal::Connecting => transport.begin_connecting(),
                ConnectionSignal::Connected => transport.connect(),
                ConnectionSignal::Disconnected => transport.disconnect(),
            },
        }
        tokio::task::yield_now().await;
    }

    let settle = config.debounce_ms.max(config.max_delay_ms.unwrap_or(0));
    time::sleep(Duration::from_millis(settle) + SETTLE_MARGIN).await;
    engine.teardown().await;

    let report = serde_json::to_string_pretty(&engine.stats())
        .map_err(|e| format!("failed to serialize stats: {e}"))?;
    println!("{report}");
    Ok(())
}

fn print_help() {
    println!(
        "replay: drive a scripted push-event stream through the realtime engine\n\n\
         USAGE:\n    replay --script <steps.jsonl> [--config <engine.json>]\n\n\
         Each script line is one JSON step:\n    \
         {{\"at_ms\": 0, \"signal\": \"connected\"}}\n    \
         {{\"at_ms\": 100, \"event\": \"record:updated\", \"payload\": {{\"id\": \"42\"}}}}\n\n\
         Engine settings can also be overridden with LEADSYNC_* environment variables."
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_script_orders_steps() {
        let raw = r#"
            # warm up
            {"at_ms": 500, "event": "record:updated", "payload": {"id": "42"}}
            {"at_ms": 0, "signal": "connected"}

            {"at_ms": 500, "event": "record:created"}
        "#;

        let steps = parse_script(raw).unwrap();
        assert_eq!(
            steps,
            vec![
                ScriptStep {
                    at_ms: 0,
                    action: StepAction::Signal {
                        signal: ConnectionSignal::Connected
                    },
                },
                ScriptStep {
                    at_ms: 500,
                    action: StepAction::Event {
                        event: "record:updated".to_string(),
                        payload: json!({"id": "42"}),
                    },
                },
                ScriptStep {
                    at_ms: 500,
                    action: StepAction::Event {
                        event: "record:created".to_string(),
                        payload: Value::Null,
                    },
                },
            ]
        );
    }

    #[test]
    fn test_parse_script_reports_line_number() {
        let raw = "{\"at_ms\": 0, \"signal\": \"connected\"}\n{\"at_ms\": \"soon\"}\n";
        let err = parse_script(raw).unwrap_err().to_string();
        assert!(err.contains("line 2"), "unexpected error: {err}");
    }
}
