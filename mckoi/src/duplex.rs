// An in-memory full-duplex byte stream (SPEC_FULL.md §2): `mckoi-admin`
// can run every role in one process, with each pair of roles talking the
// same `mckoi_net` framing they would over TCP, but over one of these
// instead of a socket. Grounded on the pack's use of plain
// `std::sync::mpsc` channels to model node-to-node links in-memory rather
// than a real transport (the teacher itself has no networking code to draw
// on here).

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{channel, Receiver, Sender};

pub struct DuplexStream {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl DuplexStream {
    /// Two ends of the same pipe; bytes written to one are read from the
    /// other, in order, with no message boundaries (a `TcpStream` stand-in).
    pub fn pair() -> (DuplexStream, DuplexStream) {
        let (tx_a, rx_a) = channel();
        let (tx_b, rx_b) = channel();
        (
            DuplexStream { tx: tx_a, rx: rx_b, pending: VecDeque::new() },
            DuplexStream { tx: tx_b, rx: rx_a, pending: VecDeque::new() },
        )
    }
}

impl Read for DuplexStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => return Ok(0), // peer end dropped: treat as EOF
            }
        }
        let n = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for DuplexStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer end dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_write_on_one_end_reads_on_the_other() {
        let (mut a, mut b) = DuplexStream::pair();
        a.write_all(b"hello").unwrap();
        let mut buf = [0_u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_read_spans_multiple_writes() {
        let (mut a, mut b) = DuplexStream::pair();
        a.write_all(b"ab").unwrap();
        a.write_all(b"cde").unwrap();
        let mut buf = [0_u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abcde");
    }

    #[test]
    fn test_dropped_peer_reads_as_eof() {
        let (a, mut b) = DuplexStream::pair();
        drop(a);
        let mut buf = [0_u8; 1];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }
}
