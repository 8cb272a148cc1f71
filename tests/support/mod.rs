//! Scripted in-process Bolt server for integration tests.
//!
//! Speaks just enough of the protocol to exercise the driver end-to-end:
//! handshake, HELLO/LOGON, RUN, PULL with `has_more` batching, and RESET.
//! Responses come from a per-test [`ServerScript`], not a real database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use cyq::bolt::message::tag;
use cyq::bolt::packstream::{decode, encode};
use cyq::bolt::{BoltResponse, FailureMessage, RecordMessage, Structure, SuccessMessage};
use cyq::Value;

/// What the server should answer with.
#[derive(Clone)]
pub struct ServerScript {
    /// Column names for RUN SUCCESS
    pub fields: Vec<&'static str>,
    /// Rows served by PULL
    pub rows: Vec<Vec<Value>>,
    /// Credentials LOGON must carry; None accepts anything
    pub credentials: Option<(&'static str, &'static str)>,
    /// Answer every RUN with this FAILURE instead
    pub fail_run: Option<(&'static str, &'static str)>,
    /// Bookmark on the terminal PULL SUCCESS
    pub bookmark: &'static str,
}

impl ServerScript {
    pub fn returning(fields: Vec<&'static str>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            fields,
            rows,
            credentials: None,
            fail_run: None,
            bookmark: "bm:test:1",
        }
    }

    /// Rows `1..=n` under a single column `i`.
    pub fn unwind(n: i64) -> Self {
        Self::returning(
            vec!["i"],
            (1..=n).map(|i| vec![Value::Integer(i)]).collect(),
        )
    }
}

/// A running scripted server.
pub struct TestServer {
    pub address: String,
    accepted: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

/// Route driver tracing to the test output. Installed once per binary.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

impl TestServer {
    /// Bind on an ephemeral port and serve the script until dropped.
    pub async fn start(script: ServerScript) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));

        let handle = {
            let accepted = accepted.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(session(socket, script.clone()));
                }
            })
        };

        Self {
            address,
            accepted,
            handle,
        }
    }

    /// Connection URL for this server.
    pub fn url(&self) -> String {
        format!("neo4j://user:pass@{}", self.address)
    }

    /// How many connections the server accepted.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn session(mut socket: TcpStream, script: ServerScript) {
    // Handshake: 20 bytes in, pick 5.8.
    let mut handshake = [0u8; 20];
    if socket.read_exact(&mut handshake).await.is_err() {
        return;
    }
    assert_eq!(&handshake[0..4], &[0x60, 0x60, 0xB0, 0x17]);
    if socket.write_all(&[0, 0, 8, 5]).await.is_err() {
        return;
    }

    // Cursor over the scripted rows, reset by each RUN.
    let mut next_row = 0usize;

    while let Some(request) = read_message(&mut socket).await {
        match request.tag {
            tag::HELLO => {
                let mut success = SuccessMessage::new();
                success.add("server", Value::from("Neo4j/5.8.0"));
                success.add("connection_id", Value::from("bolt-test-1"));
                write_message(&mut socket, &BoltResponse::Success(success)).await;
            }

            tag::LOGON => {
                let ok = match script.credentials {
                    None => true,
                    Some((user, pass)) => {
                        let auth = request.fields[0].as_map().unwrap();
                        auth.get("principal").and_then(|v| v.as_str()) == Some(user)
                            && auth.get("credentials").and_then(|v| v.as_str()) == Some(pass)
                            && auth.get("scheme").and_then(|v| v.as_str()) == Some("basic")
                    }
                };
                if ok {
                    write_message(&mut socket, &BoltResponse::Success(SuccessMessage::new()))
                        .await;
                } else {
                    write_message(
                        &mut socket,
                        &BoltResponse::Failure(FailureMessage::new(
                            "Neo.ClientError.Security.Unauthorized",
                            "The client is unauthorized due to authentication failure.",
                        )),
                    )
                    .await;
                }
            }

            tag::RUN => {
                if let Some((code, message)) = script.fail_run {
                    write_message(
                        &mut socket,
                        &BoltResponse::Failure(FailureMessage::new(code, message)),
                    )
                    .await;
                    continue;
                }
                next_row = 0;
                let mut success = SuccessMessage::new();
                success.add(
                    "fields",
                    Value::List(script.fields.iter().map(|f| Value::from(*f)).collect()),
                );
                success.add("t_first", Value::Integer(1));
                write_message(&mut socket, &BoltResponse::Success(success)).await;
            }

            tag::PULL => {
                let n = request.fields[0]
                    .as_map()
                    .and_then(|extra| extra.get("n"))
                    .and_then(|v| v.as_int())
                    .unwrap_or(-1);

                let remaining = script.rows.len() - next_row;
                let serve = if n < 0 {
                    remaining
                } else {
                    remaining.min(n as usize)
                };

                for row in &script.rows[next_row..next_row + serve] {
                    write_message(
                        &mut socket,
                        &BoltResponse::Record(RecordMessage::new(row.clone())),
                    )
                    .await;
                }
                next_row += serve;

                let has_more = next_row < script.rows.len();
                let mut success = SuccessMessage::new();
                if has_more {
                    success.add("has_more", Value::Boolean(true));
                } else {
                    success.add("bookmark", Value::from(script.bookmark));
                    success.add("t_last", Value::Integer(2));
                    let mut stats = std::collections::HashMap::new();
                    stats.insert("nodes-created".to_string(), Value::Integer(0));
                    success.add("stats", Value::Map(stats));
                }
                write_message(&mut socket, &BoltResponse::Success(success)).await;
            }

            tag::RESET => {
                next_row = script.rows.len();
                write_message(&mut socket, &BoltResponse::Success(SuccessMessage::new()))
                    .await;
            }

            tag::GOODBYE => return,

            other => panic!("scripted server got unexpected message 0x{:02X}", other),
        }
    }
}

/// Read one chunked message; None on EOF.
async fn read_message(socket: &mut TcpStream) -> Option<Structure> {
    let mut body = Vec::new();
    loop {
        let mut header = [0u8; 2];
        if socket.read_exact(&mut header).await.is_err() {
            return None;
        }
        let len = u16::from_be_bytes(header) as usize;
        if len == 0 {
            if body.is_empty() {
                continue; // NOOP
            }
            break;
        }
        let mut chunk = vec![0u8; len];
        socket.read_exact(&mut chunk).await.ok()?;
        body.extend_from_slice(&chunk);
    }

    match decode(&body).expect("client sent undecodable message") {
        Value::Structure(s) => Some(s),
        other => panic!("client sent non-structure message: {:?}", other),
    }
}

/// Write one response as a single chunk plus terminator.
async fn write_message(socket: &mut TcpStream, response: &BoltResponse) {
    let encoded = encode(&Value::Structure(response.to_structure())).unwrap();
    let mut frame = Vec::with_capacity(encoded.len() + 4);
    frame.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
    frame.extend_from_slice(&encoded);
    frame.extend_from_slice(&[0, 0]);
    let _ = socket.write_all(&frame).await;
}
