//! Per-connection request loop.
//!
//! A connection carries any number of requests. Each frame produces exactly
//! one response line; the loop ends at EOF, after the idle read timeout, once
//! shutdown has been requested, or after repeated framing errors.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use broker_config::BrokerLimits;

use crate::transport::{
    ConnectionHandler, ConnectionStream, FrameError, FrameReader, is_idle_timeout,
};

use super::dispatcher::Dispatcher;
use super::errors::BrokerError;
use super::request::decode_frame;
use super::response::{BrokerResponse, ResponseWriter};
use super::router::DISPATCH_TARGET;

/// Consecutive unreadable frames after which a connection is dropped.
pub const MAX_CONSECUTIVE_FRAMING_ERRORS: usize = 3;

/// Connection handler that feeds decoded frames to the [`Dispatcher`].
#[derive(Debug)]
pub struct BrokerConnectionHandler {
    dispatcher: Arc<Dispatcher>,
    max_request_bytes: usize,
    idle: Duration,
}

impl BrokerConnectionHandler {
    /// Creates a handler enforcing the framing limits in `limits`.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, limits: &BrokerLimits) -> Self {
        Self {
            dispatcher,
            max_request_bytes: limits.max_request_bytes,
            idle: limits.connection_idle,
        }
    }

    fn serve(&self, stream: ConnectionStream) -> io::Result<()> {
        stream.set_read_timeout(Some(self.idle))?;
        let mut responses = ResponseWriter::new(stream.try_clone()?);
        let mut frames = FrameReader::new(stream, self.max_request_bytes);
        let shutdown = self.dispatcher.services().shutdown();
        let mut framing_errors = 0;

        while !shutdown.is_fired() {
            let response = match frames.next_frame() {
                Ok(None) => {
                    debug!(target: DISPATCH_TARGET, "client closed connection");
                    break;
                }
                Ok(Some(frame)) if frame.bytes().trim_ascii().is_empty() => continue,
                Ok(Some(frame)) => match decode_frame(frame.bytes()) {
                    Ok(raw) => {
                        framing_errors = 0;
                        self.dispatcher.dispatch(&raw).response
                    }
                    Err(error) => {
                        framing_errors += 1;
                        warn!(target: DISPATCH_TARGET, %error, "unreadable request");
                        BrokerResponse::failure(&error)
                    }
                },
                Err(FrameError::TooLarge { size, max }) => {
                    framing_errors += 1;
                    warn!(target: DISPATCH_TARGET, size, max, "oversized request discarded");
                    BrokerResponse::failure(&BrokerError::internal(format!(
                        "request too large: {size} bytes exceeds {max} byte limit"
                    )))
                }
                Err(FrameError::Io(error)) if is_idle_timeout(&error) => {
                    debug!(target: DISPATCH_TARGET, "idle connection timed out");
                    break;
                }
                Err(FrameError::Io(error)) => return Err(error),
            };
            responses.write_response(&response)?;
            if framing_errors >= MAX_CONSECUTIVE_FRAMING_ERRORS {
                warn!(
                    target: DISPATCH_TARGET,
                    errors = framing_errors,
                    "closing connection after repeated framing errors"
                );
                break;
            }
        }
        Ok(())
    }
}

impl ConnectionHandler for BrokerConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        if let Err(error) = self.serve(stream) {
            warn!(target: DISPATCH_TARGET, %error, "connection dropped on transport error");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{Shutdown, TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use rstest::{fixture, rstest};
    use serde_json::{Value, json};

    use super::*;
    use crate::dispatch::{HandlerError, HandlerTable};
    use crate::services::BrokerServices;
    use crate::services::test_support::dispatcher;

    fn echo(_: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
        Ok(params.clone())
    }

    /// A TCP pair with the handler serving the accepted side.
    struct HandlerTestHarness {
        client: TcpStream,
        server: JoinHandle<()>,
    }

    impl HandlerTestHarness {
        fn start(max_request_bytes: usize) -> Self {
            let mut table = HandlerTable::new();
            table.register("test", "echo", echo);
            let handler = BrokerConnectionHandler {
                dispatcher: Arc::new(dispatcher(table)),
                max_request_bytes,
                idle: Duration::from_secs(5),
            };
            let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
            let addr = listener.local_addr().expect("addr");
            let server = thread::spawn(move || {
                let (stream, _) = listener.accept().expect("accept");
                handler.handle(ConnectionStream::Tcp(stream));
            });
            let client = TcpStream::connect(addr).expect("connect");
            Self { client, server }
        }

        fn send(&mut self, bytes: &[u8]) {
            self.client.write_all(bytes).expect("write request");
            self.client.flush().expect("flush");
        }

        /// Half-closes the client and returns every response line.
        fn finish(mut self) -> Vec<Value> {
            self.client.shutdown(Shutdown::Write).expect("half close");
            let lines = BufReader::new(&mut self.client)
                .lines()
                .map(|line| serde_json::from_str(&line.expect("line")).expect("json response"))
                .collect();
            self.server.join().expect("server join");
            lines
        }
    }

    #[fixture]
    fn harness() -> HandlerTestHarness {
        HandlerTestHarness::start(1024)
    }

    #[rstest]
    fn keep_alive_answers_each_line(mut harness: HandlerTestHarness) {
        harness.send(b"{\"module\":\"test\",\"function\":\"echo\",\"params\":{\"n\":1}}\n");
        harness.send(b"{\"module\":\"test\",\"function\":\"echo\",\"params\":{\"n\":2}}\n");
        let responses = harness.finish();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"], json!({"n": 1}));
        assert_eq!(responses[1]["result"], json!({"n": 2}));
    }

    #[rstest]
    fn unterminated_request_is_answered_before_eof(mut harness: HandlerTestHarness) {
        harness.send(b"{\"module\":\"test\",\"function\":\"echo\",\"params\":{\"legacy\":true}}");
        let mut reader = BufReader::new(harness.client.try_clone().expect("clone"));
        let mut line = String::new();
        reader.read_line(&mut line).expect("response before close");
        let response: Value = serde_json::from_str(&line).expect("json");
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["result"], json!({"legacy": true}));
        assert!(harness.finish().is_empty());
    }

    #[rstest]
    fn malformed_json_yields_internal_error(mut harness: HandlerTestHarness) {
        harness.send(b"not valid json\n");
        harness.send(b"{\"module\":\"test\",\"function\":\"echo\"}\n");
        let responses = harness.finish();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["success"], json!(false));
        assert_eq!(responses[0]["error_kind"], json!("internal"));
        assert!(
            responses[0]["error"]
                .as_str()
                .is_some_and(|error| error.contains("malformed"))
        );
        assert_eq!(responses[1]["success"], json!(true));
    }

    #[rstest]
    fn oversized_request_resynchronises(mut harness: HandlerTestHarness) {
        let mut oversized = vec![b'x'; 4096];
        oversized.push(b'\n');
        harness.send(&oversized);
        harness.send(b"{\"module\":\"test\",\"function\":\"echo\"}\n");
        let responses = harness.finish();

        assert_eq!(responses.len(), 2);
        assert!(
            responses[0]["error"]
                .as_str()
                .is_some_and(|error| error.contains("too large"))
        );
        assert_eq!(responses[1]["success"], json!(true));
    }

    #[rstest]
    fn repeated_framing_errors_close_the_connection(mut harness: HandlerTestHarness) {
        harness.send(b"{oops\n[broken\n}nope\n");
        let mut output = String::new();
        harness
            .client
            .read_to_string(&mut output)
            .expect("server closes");
        harness.server.join().expect("server join");

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), MAX_CONSECUTIVE_FRAMING_ERRORS);
        assert!(lines.iter().all(|line| line.contains("\"success\":false")));
    }

    #[rstest]
    fn blank_lines_are_ignored(mut harness: HandlerTestHarness) {
        harness.send(b"\n\r\n{\"module\":\"test\",\"function\":\"echo\"}\n\n");
        let responses = harness.finish();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["result"], json!({}));
    }

    #[test]
    fn shutdown_stops_the_loop_after_the_current_response() {
        let mut table = HandlerTable::new();
        table.register("system", "shutdown", |services: &BrokerServices, _: &Value| {
            services.shutdown().fire();
            Ok(json!({"status": "shutting_down"}))
        });
        let handler = BrokerConnectionHandler {
            dispatcher: Arc::new(dispatcher(table)),
            max_request_bytes: 1024,
            idle: Duration::from_secs(5),
        };
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            handler.handle(ConnectionStream::Tcp(stream));
        });
        let mut client = TcpStream::connect(addr).expect("connect");
        client
            .write_all(b"{\"module\":\"system\",\"function\":\"shutdown\"}\n")
            .expect("write");

        let mut output = String::new();
        client.read_to_string(&mut output).expect("server closes");
        server.join().expect("server join");
        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("shutting_down"));
    }
}
