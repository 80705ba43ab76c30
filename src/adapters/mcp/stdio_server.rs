//! Tool server speaking newline-delimited JSON-RPC 2.0 on stdin/stdout.
//!
//! Logging goes to stderr; stdout is reserved for protocol messages.
//! Requests are handled concurrently so a slow backend call does not hold up
//! the rest of the session.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::handler::McpHandler;
use super::protocol::{JsonRpcResponse, PARSE_ERROR};

pub struct StdioServer {
    handler: McpHandler,
}

impl StdioServer {
    pub fn new(handler: McpHandler) -> Self {
        Self { handler }
    }

    /// Serve the process's stdin/stdout until stdin closes.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.run_with_io(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve until `reader` reaches end of input and every in-flight
    /// request has been answered.
    pub async fn run_with_io<R, W>(&self, reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(write_lines(rx, writer));

        info!(tools = self.handler.registry().len(), "stdio server started");

        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut in_flight = JoinSet::new();
        let read_result = loop {
            let line = match read_message(&mut reader, &mut buf).await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            let line = match line {
                Ok(line) if line.is_empty() => continue,
                Ok(line) => line,
                Err(reply) => {
                    let _ = tx.send(reply.to_line());
                    continue;
                }
            };

            let handler = self.handler.clone();
            let tx = tx.clone();
            in_flight.spawn(async move {
                if let Some(response) = handler.handle_message(&line).await {
                    let _ = tx.send(response.to_line());
                }
            });

            // Reap finished handlers so the set does not grow unbounded.
            while in_flight.try_join_next().is_some() {}
        };

        debug!(pending = in_flight.len(), "stdin closed, draining");
        while in_flight.join_next().await.is_some() {}
        drop(tx);
        writer_task.await??;
        read_result?;

        info!("stdio server stopped");
        Ok(())
    }
}

/// Read one newline-terminated message from local input.
///
/// Returns `None` at end of input. The text is trimmed and may be empty.
/// Bytes that are not UTF-8 yield the parse-error reply owed to the caller
/// instead, so one bad line never ends the session.
pub(crate) async fn read_message<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<Result<String, JsonRpcResponse>>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    match std::str::from_utf8(buf) {
        Ok(text) => Ok(Some(Ok(text.trim().to_string()))),
        Err(e) => {
            warn!(error = %e, "Local input is not valid UTF-8");
            Ok(Some(Err(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {e}"),
            ))))
        }
    }
}

/// Write each queued message as one line, flushing after every write.
pub(crate) async fn write_lines<W>(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut writer: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ToolRegistry;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_answers_each_request_once_and_skips_notifications() {
        let server = StdioServer::new(McpHandler::new(Arc::new(ToolRegistry::new())));
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
        );
        let (mut out_reader, out_writer) = tokio::io::duplex(64 * 1024);

        server.run_with_io(input.as_bytes(), out_writer).await.unwrap();

        let mut output = String::new();
        out_reader.read_to_string(&mut output).await.unwrap();
        let mut ids: Vec<i64> = output
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).unwrap()["id"].as_i64().unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_undecodable_line_gets_parse_error_and_session_continues() {
        let server = StdioServer::new(McpHandler::new(Arc::new(ToolRegistry::new())));
        let mut input = br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_vec();
        input.extend_from_slice(b"\n\xff\xfe{\n");
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#);
        input.push(b'\n');
        let (mut out_reader, out_writer) = tokio::io::duplex(64 * 1024);

        server.run_with_io(&input[..], out_writer).await.unwrap();

        let mut output = String::new();
        out_reader.read_to_string(&mut output).await.unwrap();
        let replies: Vec<Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replies.len(), 3);

        let mut answered: Vec<i64> = replies.iter().filter_map(|r| r["id"].as_i64()).collect();
        answered.sort();
        assert_eq!(answered, vec![1, 3]);

        let parse_error = replies.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(parse_error["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_read_message_trims_and_reports_end_of_input() {
        let mut reader = BufReader::new(&b"  {}  \r\nlast"[..]);
        let mut buf = Vec::new();

        let first = read_message(&mut reader, &mut buf).await.unwrap().unwrap();
        assert_eq!(first.unwrap(), "{}");
        let last = read_message(&mut reader, &mut buf).await.unwrap().unwrap();
        assert_eq!(last.unwrap(), "last");
        assert!(read_message(&mut reader, &mut buf).await.unwrap().is_none());
    }
}
