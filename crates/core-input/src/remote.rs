//! Remote control socket.
//!
//! Line protocol on a local TCP port: one command per line in the shared
//! grammar, answered with `ok` or `err <reason>`. Parsed commands are
//! forwarded into the event channel; all playback semantics stay in the
//! frontend. The accept loop and each connection observe a shared stop
//! flag (nonblocking accept, read timeouts), so shutdown is cooperative.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use core_events::{
    COMMANDS_ACCEPTED, COMMANDS_REJECTED, ControlCommand, Event, send_event,
};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_millis(250);

pub struct RemoteServer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    port: u16,
}

impl RemoteServer {
    /// Bind `127.0.0.1:port` (`0` picks an ephemeral port) and start the
    /// accept loop.
    pub fn spawn(port: u16, tx: Sender<Event>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("remote-accept".to_string())
            .spawn(move || accept_loop(listener, tx, thread_stop))
            .expect("spawn remote accept thread");
        tracing::info!(target: "input.remote", port, "remote_control_listening");
        Ok(Self {
            stop,
            handle: Some(handle),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stop(mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn signal(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for RemoteServer {
    fn drop(&mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: TcpListener, tx: Sender<Event>, stop: Arc<AtomicBool>) {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!(target: "input.remote", %peer, "remote_client_connected");
                let tx = tx.clone();
                let stop = stop.clone();
                match std::thread::Builder::new()
                    .name("remote-conn".to_string())
                    .spawn(move || serve_connection(stream, tx, stop))
                {
                    Ok(handle) => connections.push(handle),
                    Err(e) => {
                        tracing::warn!(target: "input.remote", ?e, "remote_conn_spawn_failed");
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                tracing::warn!(target: "input.remote", ?e, "remote_accept_failed");
                break;
            }
        }
        connections.retain(|h| !h.is_finished());
    }
    for handle in connections {
        let _ = handle.join();
    }
    tracing::debug!(target: "input.remote", "remote_accept_stopped");
}

fn serve_connection(stream: TcpStream, tx: Sender<Event>, stop: Arc<AtomicBool>) {
    if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        tracing::warn!(target: "input.remote", ?e, "remote_read_timeout_failed");
        return;
    }
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(target: "input.remote", ?e, "remote_clone_failed");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    while !stop.load(Ordering::Acquire) {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break, // client closed
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let reply = match ControlCommand::from_str(trimmed) {
                    Ok(command) => {
                        COMMANDS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            target: "input.remote",
                            command = trimmed,
                            "remote_command"
                        );
                        send_event(&tx, Event::Command(command));
                        "ok\n".to_string()
                    }
                    Err(e) => {
                        COMMANDS_REJECTED.fetch_add(1, Ordering::Relaxed);
                        format!("err {e}\n")
                    }
                };
                if writer.write_all(reply.as_bytes()).is_err() {
                    break;
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};

    #[test]
    fn commands_round_trip_over_tcp() {
        let (tx, rx) = core_events::channel();
        let server = RemoteServer::spawn(0, tx).unwrap();
        let mut client = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
        client
            .write_all(b"play\nrate 2\nbogus nonsense\nseek 1.5\n")
            .unwrap();
        let mut replies = BufReader::new(client.try_clone().unwrap());
        let mut line = String::new();
        let mut all = Vec::new();
        for _ in 0..4 {
            line.clear();
            replies.read_line(&mut line).unwrap();
            all.push(line.trim().to_string());
        }
        assert_eq!(all[0], "ok");
        assert_eq!(all[1], "ok");
        assert!(all[2].starts_with("err "));
        assert_eq!(all[3], "ok");

        assert_eq!(rx.recv().unwrap(), Event::Command(ControlCommand::Play));
        assert_eq!(rx.recv().unwrap(), Event::Command(ControlCommand::SetRate(2.0)));
        assert_eq!(rx.recv().unwrap(), Event::Command(ControlCommand::Seek(1.5)));
        drop(client);
        server.stop();
    }

    #[test]
    fn stop_joins_cleanly_with_open_connection() {
        let (tx, _rx) = core_events::channel();
        let server = RemoteServer::spawn(0, tx).unwrap();
        let _client = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        server.stop(); // must not hang on the idle connection
    }
}
