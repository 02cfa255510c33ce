//! CLI channel: JSON-lines requests on stdin, responses on stdout.

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{Error, ErrorKind, Result};
use crate::jobs::{HistoryFilter, ScrapeTarget};
use crate::memory::{NewObservation, ObservationFilter};

/// One request line, tagged by `op`.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Scrape {
        url: String,
        goal: String,
    },
    Batch {
        targets: Vec<ScrapeTarget>,
    },
    Tools,
    ExecuteTool {
        name: String,
        #[serde(default)]
        input: Value,
    },
    Memory {
        #[serde(flatten)]
        filter: ObservationFilter,
    },
    PostMemory {
        observation: NewObservation,
    },
    MemoryStats,
    Recommendations {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        goal: Option<String>,
        #[serde(default, alias = "topK")]
        top_k: Option<usize>,
    },
    Status {
        #[serde(alias = "jobId")]
        job_id: Uuid,
    },
    History {
        #[serde(flatten)]
        filter: HistoryFilter,
    },
    Cancel {
        #[serde(alias = "jobId")]
        job_id: Uuid,
    },
    AgentStatus,
    Health,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// One response line.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: bool, data: Value },
    Err { ok: bool, error: ErrorBody },
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self::Ok { ok: true, data }
    }

    pub fn error(err: &Error) -> Self {
        Self::Err {
            ok: false,
            error: ErrorBody {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::Internal(format!("unserializable response: {e}")))
}

/// Dispatch a parsed request onto the engine.
pub async fn handle_request(engine: &Engine, request: Request) -> Result<Value> {
    match request {
        Request::Scrape { url, goal } => to_value(engine.scrape(&url, &goal).await?),
        Request::Batch { targets } => to_value(engine.batch_scrape(targets).await?),
        Request::Tools => to_value(engine.list_tools()),
        Request::ExecuteTool { name, input } => to_value(engine.execute_tool(&name, input).await?),
        Request::Memory { filter } => to_value(engine.memory(&filter).await),
        Request::PostMemory { observation } => {
            let stored = engine.post_memory(observation).await?;
            Ok(json!({ "id": stored.id }))
        }
        Request::MemoryStats => to_value(engine.memory_stats().await),
        Request::Recommendations { url, goal, top_k } => {
            let query = url
                .or(goal)
                .ok_or_else(|| Error::invalid("recommendations need a url or a goal"))?;
            to_value(engine.recommendations(&query, top_k).await?)
        }
        Request::Status { job_id } => to_value(engine.status(job_id).await?),
        Request::History { filter } => to_value(engine.history(filter).await),
        Request::Cancel { job_id } => to_value(engine.cancel(job_id).await?),
        Request::AgentStatus => to_value(engine.agent_status().await),
        Request::Health => to_value(engine.health()),
    }
}

/// Handle one raw input line. Never fails; errors become error responses.
pub async fn handle_line(engine: &Engine, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return Response::error(&Error::invalid(format!("malformed request: {e}"))),
    };
    match handle_request(engine, request).await {
        Ok(data) => Response::ok(data),
        Err(e) => {
            tracing::debug!(error = %e, "Request failed");
            Response::error(&e)
        }
    }
}

/// Serve stdin until EOF.
pub async fn run(engine: &Engine) -> std::io::Result<()> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let reader = BufReader::new(tokio::io::stdin());
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    let mut requests = Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|line| (line, rx))
    }));

    let mut stdout = tokio::io::stdout();
    while let Some(line) = requests.next().await {
        let response = handle_line(engine, &line).await;
        let mut out = match serde_json::to_string(&response) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to encode response: {}", e);
                continue;
            }
        };
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::tools::ToolRegistry;

    async fn engine() -> Engine {
        let mut tools = ToolRegistry::new();
        tools.register_builtin_tools().unwrap();
        let config = AgentConfig {
            scrape_tool: "echo".to_string(),
            ..AgentConfig::default()
        };
        Engine::start(config, tools, None).await.unwrap()
    }

    fn as_json(response: &Response) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[test]
    fn parses_tagged_requests() {
        let req: Request =
            serde_json::from_str(r#"{"op":"scrape","url":"https://a.com","goal":"g"}"#).unwrap();
        assert!(matches!(req, Request::Scrape { .. }));

        let req: Request =
            serde_json::from_str(r#"{"op":"recommendations","goal":"prices","topK":2}"#).unwrap();
        assert!(matches!(
            req,
            Request::Recommendations { top_k: Some(2), .. }
        ));

        let req: Request = serde_json::from_str(r#"{"op":"history","status":"failed"}"#).unwrap();
        assert!(matches!(req, Request::History { .. }));
    }

    #[test]
    fn unserializable_response_is_internal() {
        let keyed_by_tuple = std::collections::HashMap::from([((1u8, 2u8), 3u8)]);
        let err = to_value(keyed_by_tuple).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        let v = serde_json::to_value(Response::error(&err)).unwrap();
        assert_eq!(v["error"]["kind"], "internal");
    }

    #[tokio::test]
    async fn malformed_line_is_invalid_request() {
        let engine = engine().await;
        let v = as_json(&handle_line(&engine, "not json").await);
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["kind"], "invalid_request");

        let v = as_json(&handle_line(&engine, r#"{"op":"teleport"}"#).await);
        assert_eq!(v["error"]["kind"], "invalid_request");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn health_and_tools() {
        let engine = engine().await;
        let v = as_json(&handle_line(&engine, r#"{"op":"health"}"#).await);
        assert_eq!(v["ok"], true);
        assert_eq!(v["data"]["status"], "ok");

        let v = as_json(&handle_line(&engine, r#"{"op":"tools"}"#).await);
        let names: Vec<&str> = v["data"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(names.contains(&"echo"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_tool_and_unknown_id() {
        let engine = engine().await;
        let v = as_json(
            &handle_line(&engine, r#"{"op":"execute_tool","name":"nope","input":{}}"#).await,
        );
        assert_eq!(v["error"]["kind"], "unknown_tool");

        let line = format!(r#"{{"op":"status","job_id":"{}"}}"#, Uuid::new_v4());
        let v = as_json(&handle_line(&engine, &line).await);
        assert_eq!(v["error"]["kind"], "not_found");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn post_memory_then_recommend() {
        let engine = engine().await;
        let v = as_json(
            &handle_line(
                &engine,
                r#"{"op":"post_memory","observation":{"url":"https://shop.example.com/p/1","goal":"find the price","content":{"price":10}}}"#,
            )
            .await,
        );
        assert_eq!(v["ok"], true);
        let id = v["data"]["id"].as_str().unwrap().to_string();

        let v = as_json(
            &handle_line(
                &engine,
                r#"{"op":"recommendations","url":"https://shop.example.com/p/1","top_k":1}"#,
            )
            .await,
        );
        assert_eq!(v["data"][0]["observation"]["id"], id.as_str());

        let v = as_json(&handle_line(&engine, r#"{"op":"recommendations"}"#).await);
        assert_eq!(v["error"]["kind"], "invalid_request");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let engine = engine().await;
        let v = as_json(&handle_line(&engine, r#"{"op":"batch","targets":[]}"#).await);
        assert_eq!(v["error"]["kind"], "invalid_request");
        engine.shutdown().await;
    }
}
