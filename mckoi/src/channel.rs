// One end of a request/response link to a server role, speaking the
// length-prefixed, HMAC-tagged framing from `mckoi_net::wire` (spec §6.2).
// Generic over the byte stream so the same code drives a `TcpStream` or a
// `DuplexStream` (SPEC_FULL.md §2's in-process harness).

use std::io::{Read, Write};
use std::sync::Mutex;

use mckoi_base::Result;
use mckoi_net::{read_message, write_message, Request, Response};

pub trait Channel: Send + Sync {
    fn call(&self, req: Request) -> Result<Response>;
}

pub struct StreamChannel<S> {
    stream: Mutex<S>,
    secret: Vec<u8>,
}

impl<S: Read + Write> StreamChannel<S> {
    pub fn new(stream: S, secret: Vec<u8>) -> Self {
        StreamChannel { stream: Mutex::new(stream), secret }
    }
}

impl<S: Read + Write + Send> Channel for StreamChannel<S> {
    /// One call at a time per channel: the mutex both serializes the
    /// request/response pairing on a single stream and matches spec
    /// §4.5's "one active cursor" framing at the transport seam.
    fn call(&self, req: Request) -> Result<Response> {
        let mut stream = self.stream.lock().unwrap();
        write_message(&mut *stream, &self.secret, &req)?;
        read_message(&mut *stream, &self.secret)
    }
}
