use crate::{
    dispatcher::{Dispatcher, QueryEnvelope, RequesterId},
    sql::parse_statement,
};
use anyhow::Result;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, error, info, warn};

/// Binds `addr` and serves clients until the listener fails.
///
/// ## Protocol Features
/// - **Multi-line statements**: SQL can span multiple lines
/// - **Statement termination**: Statements must end with semicolon (;)
/// - **One requester per connection**: each client gets its own response channel
/// - **Graceful shutdown**: Clients can send "QUIT;" to disconnect
/// - **Error handling**: parse and execution errors are returned as "ERROR: message"
///
/// ## Protocol Example
/// ```text
/// Client: INSERT INTO people VALUES (2, 21, 180.23, 'Joe Brown');
/// Server: Inserted 2;21;180.23;Joe Brown
///
/// Client: SELECT * FROM people WHERE age >= 18;
/// Server: 2;21;180.23;Joe Brown
///
/// Client: QUIT;
/// Server: bye
/// ```
///
/// Every response is followed by an empty line, so a client can tell where
/// a multi-line SELECT result ends.
pub async fn serve(dispatcher: Arc<Dispatcher>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    serve_listener(dispatcher, listener).await
}

/// Accept loop over an already bound listener.
pub async fn serve_listener(dispatcher: Arc<Dispatcher>, listener: TcpListener) -> Result<()> {
    let next_requester = AtomicU64::new(1);
    loop {
        let (socket, peer) = listener.accept().await?;
        let requester = RequesterId(next_requester.fetch_add(1, Ordering::Relaxed));
        let dispatcher = Arc::clone(&dispatcher);
        info!(%peer, %requester, "client connected");

        tokio::spawn(async move {
            if let Err(e) = handle_client(&dispatcher, requester, socket).await {
                error!(%requester, error = %e, "client session failed");
            }
            dispatcher.router().close(requester);
            info!(%peer, %requester, "client disconnected");
        });
    }
}

/// Handles one client session: accumulate lines until semicolon, parse,
/// submit, and write the reassembled response back.
async fn handle_client(dispatcher: &Dispatcher, requester: RequesterId, socket: TcpStream) -> Result<()> {
    let mut inbox = dispatcher.subscribe(requester)?;
    let (r, mut w) = socket.into_split();
    let mut reader = BufReader::new(r).lines();

    w.write_all(b"simple-db ready. End statements with ;\n").await?;

    let mut buf = String::new();
    while let Some(line) = reader.next_line().await? {
        let line = line.trim_end();
        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(line);

        if !buf.ends_with(';') {
            continue;
        }
        let stmt = std::mem::take(&mut buf);

        if stmt.trim().eq_ignore_ascii_case("QUIT;") {
            w.write_all(b"bye\n").await?;
            break;
        }

        let query = match parse_statement(&stmt) {
            Ok(query) => query,
            Err(e) => {
                warn!(%requester, error = %e, "rejected statement");
                w.write_all(format!("ERROR: {e}\n\n").as_bytes()).await?;
                continue;
            }
        };
        debug!(%requester, kind = query.kind(), "statement parsed");

        dispatcher.submit(QueryEnvelope::new(requester, query)).await?;
        let response = inbox.recv_response().await?;
        w.write_all(response.as_bytes()).await?;
        w.write_all(b"\n").await?;
    }
    Ok(())
}
