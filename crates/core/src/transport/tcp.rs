use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Connect with a bounded wait, disable Nagle, and set I/O timeouts.
pub fn connect(
    peer: SocketAddr,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&peer, connect_timeout)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(io_timeout))?;
    stream.set_write_timeout(Some(io_timeout))?;
    tracing::debug!(%peer, local = ?stream.local_addr().ok(), "control stream connected");
    Ok(stream)
}

pub fn send_all(stream: &mut TcpStream, data: &[u8]) -> io::Result<()> {
    stream.write_all(data)?;
    stream.flush()
}

/// Blocking read loop for a stream shared with interleaved media.
///
/// Reads until `running` is cleared, the peer closes, or `on_data` returns
/// `false`. Read timeouts only re-check the flag, so the stream should carry
/// a short read timeout.
pub fn read_loop<F>(mut stream: TcpStream, running: Arc<AtomicBool>, buffer_size: usize, mut on_data: F)
where
    F: FnMut(&[u8]) -> bool,
{
    let mut buf = vec![0u8; buffer_size.max(1500)];
    let reason = loop {
        if !running.load(Ordering::SeqCst) {
            break "stopped";
        }
        match stream.read(&mut buf) {
            Ok(0) => break "connection closed by server",
            Ok(n) => {
                if !on_data(&buf[..n]) {
                    break "receiver finished";
                }
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "interleaved read error");
                }
                break "read error";
            }
        }
    };
    tracing::debug!(reason, "interleaved reader exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn read_loop_delivers_chunks_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            s.write_all(b"$\x00\x00\x02ab").unwrap();
            s.write_all(b"RTSP/1.0 200 OK\r\n\r\n").unwrap();
        });

        let stream = connect(addr, Duration::from_secs(1), Duration::from_millis(50)).unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let mut seen = Vec::new();
        read_loop(stream, running, 64, |chunk| {
            seen.extend_from_slice(chunk);
            true
        });
        server.join().unwrap();
        assert_eq!(&seen[..6], b"$\x00\x00\x02ab");
        assert!(seen.ends_with(b"200 OK\r\n\r\n"));
    }
}
