// =============================================================================
// Live trade ingest — external stream consumer
// =============================================================================
//
// The wire protocol of the upstream trade-stream producer is out of scope;
// all this module owns is the seam between a TCP connection at
// `STREAM_ADDR` and `LiveModel::ingest`. One JSON-encoded `TradeRecord` per
// line, matching the NDJSON convention used everywhere else this crate reads
// or writes trade records. `run_ingest` runs until the connection drops or a
// line fails to parse, returning `Err` either way — the caller supervises
// reconnection with backoff.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::live_model::LiveModel;
use crate::types::TradeRecord;

/// Connect to `addr`, then read newline-delimited JSON trade records until
/// the connection closes or a frame fails to decode. Returns `Ok(())` only
/// on a clean EOF; any parse or I/O error is surfaced to the caller so it
/// can log and retry.
pub async fn run_ingest(addr: &str, live_model: &Arc<LiveModel>) -> Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to trade stream at {addr}"))?;
    let mut lines = BufReader::new(stream).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e).context("reading from trade stream"),
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TradeRecord>(&line) {
            Ok(trade) => live_model.ingest(trade),
            Err(e) => {
                warn!(error = %e, "malformed trade record, dropping connection to resync");
                return Err(e).context("decoding trade record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn trade_json(symbol: &str, ts: i64) -> String {
        serde_json::json!({
            "symbol": symbol,
            "timestamp": ts,
            "price": 10.0,
            "size": 200,
            "exchange": "P",
            "conditions": "",
            "id": "1",
        })
        .to_string()
    }

    #[tokio::test]
    async fn ingests_newline_delimited_records_until_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let payload = format!("{}\n{}\n", trade_json("AAA", 1), trade_json("BBB", 2));
            socket.write_all(payload.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let live_model = Arc::new(LiveModel::new(1_000_000_000));
        run_ingest(&addr.to_string(), &live_model).await.unwrap();
        server.await.unwrap();

        assert_eq!(live_model.seen_count(), 2);
    }

    #[tokio::test]
    async fn malformed_line_surfaces_as_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"not json\n").await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let live_model = Arc::new(LiveModel::new(1_000_000_000));
        let result = run_ingest(&addr.to_string(), &live_model).await;
        server.await.unwrap();

        assert!(result.is_err());
        debug!("malformed record correctly rejected");
    }
}
