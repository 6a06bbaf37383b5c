//! Minimal line-oriented client used to talk to a running broker.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// One keep-alive connection.
pub struct BrokerClient {
    reader: BufReader<Stream>,
}

impl BrokerClient {
    pub fn tcp(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect to broker");
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("read timeout");
        Self {
            reader: BufReader::new(Stream::Tcp(stream)),
        }
    }

    #[cfg(unix)]
    pub fn unix(path: &Path) -> Self {
        let stream = UnixStream::connect(path).expect("connect to broker socket");
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("read timeout");
        Self {
            reader: BufReader::new(Stream::Unix(stream)),
        }
    }

    /// Sends `line` followed by a newline.
    pub fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes());
    }

    /// Sends raw bytes without adding a terminator.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        let stream = self.reader.get_mut();
        stream.write_all(bytes).expect("write request");
        stream.flush().expect("flush request");
    }

    /// Closes the write half, ending an unterminated request.
    pub fn finish(&mut self) {
        match self.reader.get_ref() {
            Stream::Tcp(stream) => stream.shutdown(Shutdown::Write),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.shutdown(Shutdown::Write),
        }
        .expect("shutdown write half");
    }

    /// Reads one response line; `None` once the broker closed the connection.
    pub fn receive(&mut self) -> Option<Value> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).expect("read response");
        if read == 0 {
            return None;
        }
        Some(serde_json::from_str(&line).expect("response is JSON"))
    }

    pub fn call(&mut self, request: &Value) -> Value {
        self.send(&request.to_string());
        self.receive().expect("broker replied")
    }
}

/// Opens a connection, sends one request and returns the reply.
pub fn request_once(addr: SocketAddr, request: &Value) -> Value {
    BrokerClient::tcp(addr).call(request)
}
