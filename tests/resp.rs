use mapcache::resp::RespServer;
use mapcache::{Config, Registry};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

async fn start(config: Config) -> (Registry, SocketAddr, broadcast::Sender<()>) {
  let registry = Registry::default();
  let server = Arc::new(RespServer::new(registry.clone(), &config));
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let (tx, rx) = broadcast::channel(1);
  tokio::spawn(server.serve(listener, rx));
  (registry, addr, tx)
}

async fn exchange(stream: &mut TcpStream, request: &[u8], expected: &[u8]) {
  stream.write_all(request).await.unwrap();
  let mut buf = vec![0u8; expected.len()];
  stream.read_exact(&mut buf).await.unwrap();
  assert_eq!(
    String::from_utf8_lossy(&buf),
    String::from_utf8_lossy(expected)
  );
}

// =============================================================================
// Basic Commands
// =============================================================================

#[tokio::test]
async fn test_ping_set_get() {
  let (registry, addr, _tx) = start(Config::default()).await;
  let mut stream = TcpStream::connect(addr).await.unwrap();

  exchange(&mut stream, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
  exchange(
    &mut stream,
    b"*3\r\n$3\r\nSET\r\n$6\r\nuser:1\r\n$3\r\nann\r\n",
    b"+OK\r\n",
  )
  .await;
  exchange(&mut stream, b"*2\r\n$3\r\nGET\r\n$6\r\nuser:1\r\n", b"$3\r\nann\r\n").await;
  exchange(&mut stream, b"*2\r\n$3\r\nGET\r\n$4\r\nnope\r\n", b"$-1\r\n").await;

  // Colons become path separators
  let cache = registry.fetch_cache("default").unwrap();
  assert_eq!(cache.acquire("check").get("user/1").unwrap(), json!("ann"));
}

#[tokio::test]
async fn test_unknown_command() {
  let (_registry, addr, _tx) = start(Config::default()).await;
  let mut stream = TcpStream::connect(addr).await.unwrap();
  exchange(
    &mut stream,
    b"*1\r\n$7\r\nEXPLODE\r\n",
    b"-ERR unknown command 'EXPLODE'\r\n",
  )
  .await;
  // Connection stays usable
  exchange(&mut stream, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
}

// =============================================================================
// Pipelining
// =============================================================================

#[tokio::test]
async fn test_pipelined_commands_answer_in_order() {
  let (_registry, addr, _tx) = start(Config::default()).await;
  let mut stream = TcpStream::connect(addr).await.unwrap();
  exchange(
    &mut stream,
    b"*2\r\n$4\r\nINCR\r\n$4\r\nhits\r\n*2\r\n$4\r\nINCR\r\n$4\r\nhits\r\n*2\r\n$3\r\nGET\r\n$4\r\nhits\r\n",
    b":1\r\n:2\r\n:2\r\n",
  )
  .await;
}

// =============================================================================
// Cache Selection
// =============================================================================

#[tokio::test]
async fn test_select_switches_cache() {
  let (registry, addr, _tx) = start(Config::default()).await;
  let mut stream = TcpStream::connect(addr).await.unwrap();

  exchange(&mut stream, b"*2\r\n$6\r\nSELECT\r\n$1\r\n3\r\n", b"+OK\r\n").await;
  exchange(&mut stream, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n", b"+OK\r\n").await;
  exchange(
    &mut stream,
    b"*2\r\n$6\r\nSELECT\r\n$3\r\nabc\r\n",
    b"-ERR value is not an integer or out of range\r\n",
  )
  .await;

  assert!(registry.exists("3"));
  assert!(registry.fetch_cache("3").unwrap().acquire("check").exists("k"));
  assert!(!registry.fetch_cache("default").unwrap().acquire("check").exists("k"));
}

// =============================================================================
// Connection Handling
// =============================================================================

#[tokio::test]
async fn test_quit_closes_connection() {
  let (_registry, addr, _tx) = start(Config::default()).await;
  let mut stream = TcpStream::connect(addr).await.unwrap();
  exchange(&mut stream, b"*1\r\n$4\r\nQUIT\r\n", b"+OK\r\n").await;

  let mut rest = Vec::new();
  let n = stream.read_to_end(&mut rest).await.unwrap();
  assert_eq!(n, 0);
}

#[tokio::test]
async fn test_max_connections_rejects_extra_clients() {
  let config = Config {
    resp_max_connections: 1,
    ..Config::default()
  };
  let (_registry, addr, _tx) = start(config).await;

  let mut first = TcpStream::connect(addr).await.unwrap();
  exchange(&mut first, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;

  let mut second = TcpStream::connect(addr).await.unwrap();
  let mut reply = Vec::new();
  second.read_to_end(&mut reply).await.unwrap();
  assert_eq!(reply, b"-ERR max number of clients reached\r\n");

  // The first client is unaffected
  exchange(&mut first, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
}

#[tokio::test]
async fn test_held_cache_times_out_commands() {
  let config = Config {
    command_timeout_ms: 100,
    ..Config::default()
  };
  let (registry, addr, _tx) = start(config).await;
  let cache = registry.fetch_cache("default").unwrap();
  let mut stream = TcpStream::connect(addr).await.unwrap();

  let guard = cache.acquire("holder");
  exchange(
    &mut stream,
    b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n",
    b"-ERR operation timed out\r\n",
  )
  .await;

  drop(guard);
  exchange(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$-1\r\n").await;
}

#[tokio::test]
async fn test_oversized_inline_request_closes_connection() {
  let (_registry, addr, _tx) = start(Config::default()).await;
  let mut stream = TcpStream::connect(addr).await.unwrap();

  // One byte past the inline limit, never terminated by CRLF
  let request = vec![b'a'; mapcache::resp::protocol::MAX_INLINE_LEN + 1];
  stream.write_all(&request).await.unwrap();

  let mut reply = Vec::new();
  stream.read_to_end(&mut reply).await.unwrap();
  assert_eq!(reply, b"-ERR Protocol error: too big inline request\r\n");
}

#[tokio::test]
async fn test_setrange_past_size_limit_is_refused() {
  let (registry, addr, _tx) = start(Config::default()).await;
  let mut stream = TcpStream::connect(addr).await.unwrap();
  exchange(
    &mut stream,
    b"*4\r\n$8\r\nSETRANGE\r\n$1\r\nk\r\n$19\r\n4611686018427387903\r\n$1\r\nx\r\n",
    b"-ERR string exceeds maximum allowed size\r\n",
  )
  .await;
  exchange(&mut stream, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
  assert!(!registry.fetch_cache("default").unwrap().acquire("check").exists("k"));
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
  let (_registry, addr, tx) = start(Config::default()).await;
  let mut stream = TcpStream::connect(addr).await.unwrap();
  exchange(&mut stream, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;

  tx.send(()).unwrap();

  let mut rest = Vec::new();
  let n = tokio::time::timeout(std::time::Duration::from_secs(2), stream.read_to_end(&mut rest))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(n, 0);
}
