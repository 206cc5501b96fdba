use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use swarm_core::frame::{read_frame, write_frame};
use swarm_core::utils::Logger;

use crate::commands::{self, TrackerState};

/// Accept loop: one thread per peer connection, each serving framed
/// request/response pairs until the peer closes.
pub fn serve(listener: TcpListener, state: Arc<TrackerState>, logger: Arc<Logger>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = state.clone();
                let logger = logger.clone();
                thread::spawn(move || handle_peer(stream, state, logger));
            }
            Err(e) => logger.error(format!("accept failed: {e}")),
        }
    }
}

fn handle_peer(mut stream: TcpStream, state: Arc<TrackerState>, logger: Arc<Logger>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    logger.info(format!("connection established with {peer}"));

    loop {
        let payload = match read_frame(&mut stream) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                logger.info(format!("{peer} closed the connection"));
                break;
            }
            Err(e) => {
                logger.error(format!("{peer}: {e}"));
                break;
            }
        };

        let line = String::from_utf8_lossy(&payload);
        logger.command(format!("{peer} -> {line}"));
        let response = commands::execute(&state, &line);
        logger.command(format!("{peer} <- {response}"));

        if let Err(e) = write_frame(&mut stream, response.as_bytes()) {
            logger.error(format!("{peer}: {e}"));
            break;
        }
    }
}
