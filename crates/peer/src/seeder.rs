use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use swarm_config::PIECE_SIZE;
use swarm_core::frame::{read_frame, write_frame};
use swarm_core::utils::Logger;
use swarm_core::{SwarmError, SwarmResult};

use crate::piece_index::SharedPieceIndex;

/// Accept loop of the seeder half of a peer. Each leecher connection is
/// handled on its own thread and serves framed commands until the leecher
/// closes.
pub fn serve(listener: TcpListener, index: Arc<SharedPieceIndex>, logger: Arc<Logger>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let index = index.clone();
                let logger = logger.clone();
                thread::spawn(move || handle_leecher(stream, index, logger));
            }
            Err(e) => logger.error(format!("accept failed: {e}")),
        }
    }
}

fn handle_leecher(mut stream: TcpStream, index: Arc<SharedPieceIndex>, logger: Arc<Logger>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    logger.info(format!("leecher {peer} connected"));

    loop {
        let payload = match read_frame(&mut stream) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                logger.info(format!("leecher {peer} closed the connection"));
                break;
            }
            Err(e) => {
                logger.error(format!("{peer}: {e}"));
                break;
            }
        };

        let command = String::from_utf8_lossy(&payload);
        logger.command(format!("{peer} -> {command}"));

        // Piece payloads are raw bytes; the response is built as bytes and
        // only the prefix is text.
        let response = match execute(&command, &index) {
            Ok(body) => {
                let mut out = b"Success: ".to_vec();
                out.extend_from_slice(&body);
                out
            }
            Err(e) => format!("Error: {e}").into_bytes(),
        };

        if let Err(e) = write_frame(&mut stream, &response) {
            logger.error(format!("{peer}: {e}"));
            break;
        }
    }
}

/// Run one seeder command. `give_piece_info` answers with the available
/// indices (a single space when nothing is known); `give_piece` answers
/// with raw piece bytes read at offset `(index - 1) * PIECE_SIZE`.
fn execute(command: &str, index: &SharedPieceIndex) -> SwarmResult<Vec<u8>> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let verb = *tokens
        .first()
        .ok_or_else(|| SwarmError::validation("invalid command"))?;

    match verb {
        "give_piece_info" => {
            if tokens.len() != 3 {
                return Err(SwarmError::validation("usage: give_piece_info <file> <group>"));
            }
            let available = index.available(tokens[1], tokens[2]).unwrap_or_default();
            // An unknown file or an empty list answers a single space; that
            // is an empty result, not an error.
            let mut body = String::new();
            for piece in &available {
                body.push(' ');
                body.push_str(&piece.to_string());
            }
            if body.is_empty() {
                body.push(' ');
            }
            Ok(body.into_bytes())
        }
        "give_piece" => {
            if tokens.len() != 4 {
                return Err(SwarmError::validation("usage: give_piece <file> <group> <index>"));
            }
            let piece: u32 = tokens[3]
                .parse()
                .map_err(|_| SwarmError::validation("piece index is not a number"))?;
            if piece == 0 {
                return Err(SwarmError::consistency("piece index out of range"));
            }
            let path = index
                .path_of(tokens[1], tokens[2])
                .ok_or_else(|| SwarmError::validation("file is not shared here"))?;
            if !index.has_piece(&path, piece) {
                return Err(SwarmError::validation("piece is not available"));
            }

            // File I/O happens outside both index locks.
            let mut file = File::open(&path)?;
            file.seek(SeekFrom::Start((piece as u64 - 1) * PIECE_SIZE as u64))?;
            let mut buf = vec![0u8; PIECE_SIZE];
            let n = read_up_to(&mut file, &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        }
        _ => Err(SwarmError::validation("invalid command")),
    }
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> SwarmResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod func_tests {
    use std::io::Write;
    use std::path::PathBuf;

    use swarm_core::frame::request;

    use super::*;

    fn seed_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("swarm_seeder_{name}_{}", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    fn start_seeder(index: Arc<SharedPieceIndex>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let logger =
            Arc::new(Logger::create(&format!("test-seeder-{}", addr.port()), "seeder").unwrap());
        thread::spawn(move || serve(listener, index, logger));
        addr
    }

    #[test]
    fn test_piece_info_and_piece_bytes() {
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 256) as u8).collect();
        let path = seed_file("serving", &data);
        let index = Arc::new(SharedPieceIndex::new());
        index.register("serving.bin", "g", &path);
        index.publish_all(&path, 3);

        let addr = start_seeder(index);
        let mut stream = TcpStream::connect(addr).unwrap();

        let response = request(&mut stream, b"give_piece_info serving.bin g").unwrap();
        assert_eq!(response, b"Success:  1 2 3");

        let response = request(&mut stream, b"give_piece serving.bin g 2").unwrap();
        assert_eq!(&response[..9], b"Success: ");
        assert_eq!(&response[9..], &data[1024..2048]);

        // The short last piece comes back at its actual length.
        let response = request(&mut stream, b"give_piece serving.bin g 3").unwrap();
        assert_eq!(&response[9..], &data[2048..]);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_unknown_file_gives_single_space_not_error() {
        let index = Arc::new(SharedPieceIndex::new());
        let addr = start_seeder(index);
        let mut stream = TcpStream::connect(addr).unwrap();

        let response = request(&mut stream, b"give_piece_info ghost.bin g").unwrap();
        assert_eq!(response, b"Success:  ");
    }

    #[test]
    fn test_give_piece_failures_are_errors() {
        let data = vec![9u8; 1024];
        let path = seed_file("partial", &data);
        let index = Arc::new(SharedPieceIndex::new());
        index.register("partial.bin", "g", &path);
        // Nothing published yet.

        let addr = start_seeder(index);
        let mut stream = TcpStream::connect(addr).unwrap();

        let response = request(&mut stream, b"give_piece ghost.bin g 1").unwrap();
        assert!(response.starts_with(b"Error: "));
        let response = request(&mut stream, b"give_piece partial.bin g 1").unwrap();
        assert!(response.starts_with(b"Error: "));
        let response = request(&mut stream, b"give_piece partial.bin g 0").unwrap();
        assert!(response.starts_with(b"Error: "));
        let response = request(&mut stream, b"gimme_piece partial.bin g 1").unwrap();
        assert!(response.starts_with(b"Error: "));

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_piece_with_binary_content_survives_framing() {
        let mut data = vec![0u8; 1500];
        data[0] = 0;
        data[1] = b'\n';
        data[500] = 0xff;
        let path = seed_file("binary", &data);
        let index = Arc::new(SharedPieceIndex::new());
        index.register("binary.bin", "g", &path);
        index.publish_all(&path, 2);

        let addr = start_seeder(index);
        let mut stream = TcpStream::connect(addr).unwrap();
        let response = request(&mut stream, b"give_piece binary.bin g 1").unwrap();
        assert_eq!(&response[9..], &data[..1024]);

        std::fs::remove_file(path).unwrap();
    }
}
