//! Line-delimited JSON bridge between stdin/stdout and a coordinator.
//!
//! Each input line is one message; each answer is written as one line
//! (`null` when the message is not a state request). Change notifications
//! are interleaved as their own lines whenever they happen.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{broadcast::error::RecvError, Mutex},
};
use tokio_util::sync::CancellationToken;

use crate::coordinator::CoordinatorHandle;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

type SharedWriter<W> = Arc<Mutex<W>>;

async fn write_line<W>(out: &SharedWriter<W>, value: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    let mut guard = out.lock().await;
    guard.write_all(&line).await.context("failed to write output line")?;
    guard.flush().await.context("failed to flush output")?;
    Ok(())
}

pub async fn serve_stdio(handle: CoordinatorHandle) -> Result<()> {
    serve(
        handle,
        tokio::io::stdin(),
        tokio::io::stdout(),
        CancellationToken::new(),
    )
    .await
}

/// Serves until input ends, `stop` fires, or the coordinator goes away.
pub async fn serve<R, W>(
    handle: CoordinatorHandle,
    input: R,
    output: W,
    stop: CancellationToken,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let out: SharedWriter<W> = Arc::new(Mutex::new(output));

    let mut notifications = handle.subscribe();
    let forward_out = out.clone();
    let forward_stop = stop.child_token();
    let forwarder = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = forward_stop.cancelled() => break,
                received = notifications.recv() => match received {
                    Ok(notification) => {
                        if write_line(&forward_out, &notification.to_value()).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log_warn!("Output lagged; {skipped} notifications skipped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    let mut lines = BufReader::new(input).lines();
    let result = loop {
        let line = tokio::select! {
            _ = stop.cancelled() => break Ok(()),
            line = lines.next_line() => line.context("failed to read input line"),
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        };
        if line.trim().is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(err) => {
                log_warn!("Ignoring non-JSON input line: {err}");
                if let Err(err) = write_line(&out, &Value::Null).await {
                    break Err(err);
                }
                continue;
            }
        };

        let response = match handle.request(message).await {
            Ok(response) => response.unwrap_or(Value::Null),
            Err(err) => break Err(err),
        };
        if let Err(err) = write_line(&out, &response).await {
            break Err(err);
        }
    };

    stop.cancel();
    let _ = forwarder.await;
    log_info!("Stdio bridge closed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::CoordinatorConfig, coordinator::Coordinator, storage::MemoryStore};
    use serde_json::json;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn answers_each_line_and_forwards_broadcasts() {
        let coordinator = Coordinator::start(
            Arc::new(MemoryStore::new()),
            &CoordinatorConfig::default(),
        )
        .await;

        let input = concat!(
            "{\"action\":\"updateState\",\"payload\":{\"isEnabled\":false}}\n",
            "\n",
            "not json\n",
            "{\"action\":\"closeTab\"}\n",
            "{\"action\":\"getState\",\"key\":\"isEnabled\"}\n",
        );
        let (output, mut reader) = duplex(16 * 1024);

        serve(
            coordinator.handle(),
            input.as_bytes(),
            output,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut raw = String::new();
        reader.read_to_string(&mut raw).await.unwrap();
        let lines: Vec<Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert!(lines.contains(&json!({"success": true})));
        assert!(lines.contains(&json!({"isEnabled": false})));
        assert_eq!(lines.iter().filter(|v| v.is_null()).count(), 2);

        let responses: Vec<&Value> = lines
            .iter()
            .filter(|v| v.get("action").is_none())
            .collect();
        assert_eq!(responses.len(), 4);

        coordinator.shutdown().await;
    }
}
