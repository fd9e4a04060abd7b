//! Meio sintético: nenhum I/O real. Cada linha de requisição escrita no
//! stream prepara uma resposta enlatada para leitura.

use super::{ByteStream, Transport, TransportError};
use iothub_core::config::Medium;
use iothub_core::protocol::{is_request, render_response};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Identidade do dispositivo sintético.
pub const LABEL: &str = "FAKEDEVICE";

/// Stream em memória que responde ao protocolo do dispositivo.
pub struct SyntheticStream {
    payload: String,
    request: Vec<u8>,
    staged: VecDeque<u8>,
    open: Arc<AtomicBool>,
}

impl SyntheticStream {
    fn new(payload: String, open: Arc<AtomicBool>) -> Self {
        Self {
            payload,
            request: Vec::new(),
            staged: VecDeque::new(),
            open,
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "stream sintético fechado"))
        }
    }
}

impl Write for SyntheticStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.request.extend_from_slice(buf);

        while let Some(end) = self.request.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.request.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            if is_request(&line) {
                self.staged.extend(render_response(&self.payload).into_bytes());
            } else {
                debug!("Stream sintético ignorando linha {:?}", line.trim_end());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()
    }
}

impl Read for SyntheticStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        if self.staged.is_empty() {
            // Equivalente ao timeout de leitura de um link real ocioso
            return Err(io::Error::new(io::ErrorKind::TimedOut, "sem resposta pendente"));
        }

        let n = buf.len().min(self.staged.len());
        for (slot, byte) in buf.iter_mut().zip(self.staged.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Transporte sintético para testes e demonstração.
pub struct SyntheticTransport {
    payload: String,
    open: Arc<AtomicBool>,
}

impl SyntheticTransport {
    pub fn new(payload: &str) -> Self {
        Self {
            payload: payload.to_string(),
            open: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Transport for SyntheticTransport {
    fn label(&self) -> &str {
        LABEL
    }

    fn medium(&self) -> Medium {
        Medium::Synthetic
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn initiate(&mut self) -> Result<Box<dyn ByteStream>, TransportError> {
        // Streams de uma sessão anterior continuam fechados
        self.open = Arc::new(AtomicBool::new(true));
        info!("Dispositivo sintético {LABEL} conectado");
        Ok(Box::new(SyntheticStream::new(
            self.payload.clone(),
            Arc::clone(&self.open),
        )))
    }

    fn reconnect(&mut self) -> Result<Option<Box<dyn ByteStream>>, TransportError> {
        Ok(None)
    }

    fn destroy(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            info!("Dispositivo sintético {LABEL} desconectado");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iothub_core::protocol::{REQUEST_LINE, parse_response};
    use iothub_core::types::RawSample;
    use std::io::{BufRead, BufReader};

    fn read_lines(stream: &mut dyn ByteStream) -> Vec<String> {
        let mut reader = BufReader::new(stream);
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end().to_string();
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }
        lines
    }

    #[test]
    fn answers_request_with_canned_envelope() {
        let mut transport = SyntheticTransport::new("B=100 R=96 E=1 T=25.3C H=37.7%");
        let mut stream = transport.initiate().unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.label(), "FAKEDEVICE");

        stream.write_all(REQUEST_LINE.as_bytes()).unwrap();
        let lines = read_lines(stream.as_mut());
        assert_eq!(lines, vec!["<html>B=100 R=96 E=1 T=25.3C H=37.7%</html>"]);

        let samples = parse_response(&lines).unwrap();
        assert_eq!(samples[0], RawSample::new('B', 100.0));
        assert_eq!(samples[4], RawSample::new('H', 37.7));
    }

    #[test]
    fn request_split_across_writes() {
        let mut transport = SyntheticTransport::new("T=20C");
        let mut stream = transport.initiate().unwrap();

        stream.write_all(b"GET / HT").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(
            stream.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );

        stream.write_all(b"TP/1.0\r\n").unwrap();
        assert_eq!(read_lines(stream.as_mut()), vec!["<html>T=20C</html>"]);
    }

    #[test]
    fn other_lines_get_no_answer() {
        let mut transport = SyntheticTransport::new("T=20C");
        let mut stream = transport.initiate().unwrap();
        stream.write_all(b"POST / HTTP/1.0\r\n").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(
            stream.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );
    }

    #[test]
    fn destroy_closes_stream_and_is_idempotent() {
        let mut transport = SyntheticTransport::new("T=20C");
        let mut stream = transport.initiate().unwrap();

        transport.destroy();
        transport.destroy();
        assert!(!transport.is_connected());

        let err = stream.write_all(REQUEST_LINE.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn reinitiate_does_not_reopen_old_stream() {
        let mut transport = SyntheticTransport::new("T=20C");
        let mut old = transport.initiate().unwrap();
        transport.destroy();

        let mut fresh = transport.initiate().unwrap();
        assert!(old.flush().is_err());
        assert!(fresh.flush().is_ok());
        assert!(transport.reconnect().unwrap().is_none());
    }
}
