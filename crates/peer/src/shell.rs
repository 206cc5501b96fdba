use std::io::{self, BufRead, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use colored::Colorize;
use swarm_core::frame::request;
use swarm_core::hashing::{file_size, hash_vector, piece_count};
use swarm_core::utils::Logger;
use swarm_core::{SwarmError, SwarmResult};

use crate::download::{self, DownloadPhase, DownloadRegistry, FileMeta};
use crate::piece_index::SharedPieceIndex;

/// The controller half of a peer: reads commands from the user, talks to
/// the tracker over one persistent framed connection, and launches
/// downloads.
pub struct Leecher {
    tracker: TcpStream,
    token: Option<String>,
    seeder_endpoint: String,
    index: Arc<SharedPieceIndex>,
    registry: Arc<DownloadRegistry>,
    logger: Arc<Logger>,
}

impl Leecher {
    pub fn new(
        tracker: TcpStream,
        seeder_endpoint: String,
        index: Arc<SharedPieceIndex>,
        registry: Arc<DownloadRegistry>,
        logger: Arc<Logger>,
    ) -> Leecher {
        Leecher {
            tracker,
            token: None,
            seeder_endpoint,
            index,
            registry,
            logger,
        }
    }

    /// Command loop until `quit`/`exit` or closed stdin.
    pub fn run(&mut self) {
        self.logger.info("started reading commands");
        let stdin = io::stdin();
        loop {
            print!(">> ");
            let _ = io::stdout().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            match self.handle(line.trim()) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    self.logger.error(e.to_string());
                    println!("{}", format!("Error: {e}").red());
                }
            }
        }
    }

    /// Run one command line; `Ok(false)` ends the shell.
    fn handle(&mut self, line: &str) -> SwarmResult<bool> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&verb) = tokens.first() else {
            return Ok(true);
        };

        match verb {
            "quit" | "exit" => {
                self.quit();
                return Ok(false);
            }
            "create_user" => self.passthrough(line, false)?,
            "login" => self.login(&tokens, line)?,
            "logout" => self.logout()?,
            "create_group" | "join_group" | "leave_group" | "accept_request" => {
                self.passthrough(line, true)?
            }
            "list_groups" => self.listing(line, "there is no group in the network")?,
            "list_requests" => self.listing(line, "there is no pending request in the group")?,
            "list_files" => self.listing(line, "there are no files in the group")?,
            "upload_file" => self.upload_file(&tokens)?,
            "download_file" => self.download_file(&tokens)?,
            "show_downloads" => self.show_downloads(),
            "stop_share" => self.stop_share(&tokens)?,
            _ => return Err(SwarmError::validation("invalid command")),
        }
        Ok(true)
    }

    /// One framed round trip with the tracker. Returns the response
    /// payload with the `Success: ` prefix removed; an `Error: ` response
    /// is raised for the caller.
    fn send_tracker(&mut self, message: &str) -> SwarmResult<String> {
        self.logger.command(format!("-> {message}"));
        let response = request(&mut self.tracker, message.as_bytes())?;
        let text = String::from_utf8_lossy(&response).into_owned();
        self.logger.command(format!("<- {text}"));

        if let Some(reason) = text.strip_prefix("Error: ") {
            return Err(SwarmError::Remote(reason.to_string()));
        }
        match text.strip_prefix("Success:") {
            Some(rest) => Ok(rest.strip_prefix(' ').unwrap_or(rest).to_string()),
            None => Err(SwarmError::transport("malformed response from tracker")),
        }
    }

    fn auth_token(&self) -> String {
        self.token.clone().unwrap_or_else(|| "NULL".to_string())
    }

    /// Commands forwarded verbatim, optionally with the session token.
    fn passthrough(&mut self, line: &str, with_token: bool) -> SwarmResult<()> {
        let message = if with_token {
            format!("{line} {}", self.auth_token())
        } else {
            line.to_string()
        };
        let payload = self.send_tracker(&message)?;
        println!("{}", payload.green());
        Ok(())
    }

    fn login(&mut self, tokens: &[&str], line: &str) -> SwarmResult<()> {
        if tokens.len() != 3 {
            return Err(SwarmError::validation("usage: login <user> <password>"));
        }
        let message = format!("{line} {}", self.seeder_endpoint);
        let payload = self.send_tracker(&message)?;

        // The token is the first word of the payload; everything after it
        // is for display.
        let mut words = payload.split_whitespace();
        let tok = words
            .next()
            .ok_or_else(|| SwarmError::transport("malformed login response"))?
            .to_string();
        let rest: Vec<&str> = words.collect();
        self.token = Some(tok);
        println!("{}", rest.join(" ").green());
        Ok(())
    }

    fn logout(&mut self) -> SwarmResult<()> {
        let message = format!("logout {}", self.auth_token());
        let payload = self.send_tracker(&message)?;
        self.token = None;
        println!("{}", payload.green());
        Ok(())
    }

    fn quit(&mut self) {
        if self.token.is_some() {
            self.logger.info("logging out before quit");
            if let Err(e) = self.logout() {
                self.logger.error(format!("logout during quit: {e}"));
            }
        }
        self.logger.success("leecher quit");
    }

    /// Listing commands share the empty-result advisory behavior.
    fn listing(&mut self, line: &str, empty_note: &str) -> SwarmResult<()> {
        let message = format!("{line} {}", self.auth_token());
        let payload = self.send_tracker(&message)?;
        if payload.trim().is_empty() {
            println!("{}", empty_note.yellow());
        } else {
            println!("{payload}");
        }
        Ok(())
    }

    /// `upload_file <path> <group>`: hash locally, register with the
    /// tracker, then seed every piece at once.
    fn upload_file(&mut self, tokens: &[&str]) -> SwarmResult<()> {
        if tokens.len() != 3 {
            return Err(SwarmError::validation("usage: upload_file <path> <group>"));
        }
        let path = PathBuf::from(tokens[1]);
        let group = tokens[2];
        if !path.is_file() {
            return Err(SwarmError::Validation(format!("{} is not a file", path.display())));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SwarmError::validation("path has no file name"))?;

        let size = file_size(&path)?;
        let hashes = hash_vector(&path)?;
        let message = format!(
            "upload_file {file_name} {group} {size} {} {}",
            hashes.join(" "),
            self.auth_token()
        );
        let payload = self.send_tracker(&message)?;

        // Registered: this peer is now a seed for the whole file.
        self.index.register(&file_name, group, &path);
        self.index.publish_all(&path, piece_count(size));
        self.logger.success(format!("seeding {file_name} from {}", path.display()));
        println!("{}", payload.green());
        Ok(())
    }

    /// `download_file <file> <group> <destPath>`: fetch metadata and the
    /// advertiser list from the tracker, then run the engine on its own
    /// thread so the shell stays responsive.
    fn download_file(&mut self, tokens: &[&str]) -> SwarmResult<()> {
        if tokens.len() != 4 {
            return Err(SwarmError::validation("usage: download_file <file> <group> <destPath>"));
        }
        let (file, group) = (tokens[1].to_string(), tokens[2].to_string());
        let dest = resolve_dest(Path::new(tokens[3]), &file);

        let message = format!("download_file {file} {group} {}", self.auth_token());
        let payload = self.send_tracker(&message)?;
        let (size, hashes, seeders) = parse_download_payload(&payload)?;

        let meta = FileMeta { file: file.clone(), group: group.clone(), size, hashes };
        let index = self.index.clone();
        let registry = self.registry.clone();
        let logger = self.logger.clone();
        thread::spawn(move || {
            if let Err(e) = download::download(meta, seeders, dest, index, registry, logger.clone(), None)
            {
                logger.error(format!("download of {file} failed to start: {e}"));
            }
        });

        println!("{}", format!("download of {} started", tokens[1]).green());
        Ok(())
    }

    fn show_downloads(&self) {
        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            println!("{}", "no downloads yet".yellow());
            return;
        }
        for ((group, file), phase) in snapshot {
            match phase {
                DownloadPhase::Downloading => println!("[D] [{group}] {file} downloading"),
                DownloadPhase::Downloaded => {
                    println!("{}", format!("[C] [{group}] {file} downloaded").green())
                }
                DownloadPhase::Failed => {
                    println!("{}", format!("[F] [{group}] {file} download_failed").red())
                }
            }
        }
    }

    fn stop_share(&mut self, tokens: &[&str]) -> SwarmResult<()> {
        if tokens.len() != 3 {
            return Err(SwarmError::validation("usage: stop_share <group> <file>"));
        }
        let (group, file) = (tokens[1], tokens[2]);
        let message = format!("stop_share {group} {file} {}", self.auth_token());
        let payload = self.send_tracker(&message)?;
        // Our seeder stops answering for this file immediately.
        self.index.withdraw(file, group);
        println!("{}", payload.green());
        Ok(())
    }
}

/// A destination that names an existing directory receives the file under
/// its own name; anything else is taken as the target file path.
fn resolve_dest(dest: &Path, file: &str) -> PathBuf {
    if dest.is_dir() {
        dest.join(file)
    } else {
        dest.to_path_buf()
    }
}

/// Parse `download_file` response fields:
/// `<size> <N> <hash0> .. <hashN> <endpoint> [..]`.
fn parse_download_payload(payload: &str) -> SwarmResult<(u64, Vec<String>, Vec<String>)> {
    let fields: Vec<&str> = payload.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(SwarmError::transport("malformed download_file response"));
    }
    let size: u64 = fields[0]
        .parse()
        .map_err(|_| SwarmError::transport("malformed size in download_file response"))?;
    let n: usize = fields[1]
        .parse()
        .map_err(|_| SwarmError::transport("malformed piece count in download_file response"))?;
    if n as u32 != piece_count(size) || fields.len() < 3 + n + 1 {
        return Err(SwarmError::transport("malformed download_file response"));
    }
    let hashes: Vec<String> = fields[2..3 + n].iter().map(|s| s.to_string()).collect();
    let seeders: Vec<String> = fields[3 + n..].iter().map(|s| s.to_string()).collect();
    if seeders.is_empty() {
        return Err(SwarmError::transport("no seeder endpoints in download_file response"));
    }
    Ok((size, hashes, seeders))
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_parse_download_payload() {
        let payload = "3500 4 h0 h1 h2 h3 h4 10.0.0.1:9100 10.0.0.2:9101";
        let (size, hashes, seeders) = parse_download_payload(payload).unwrap();
        assert_eq!(size, 3500);
        assert_eq!(hashes, vec!["h0", "h1", "h2", "h3", "h4"]);
        assert_eq!(seeders, vec!["10.0.0.1:9100", "10.0.0.2:9101"]);
    }

    #[test]
    fn test_parse_download_payload_rejects_malformed() {
        assert!(parse_download_payload("").is_err());
        assert!(parse_download_payload("nonsense").is_err());
        // Piece count disagrees with size.
        assert!(parse_download_payload("3500 2 h0 h1 h2 10.0.0.1:9100").is_err());
        // Hashes present but no endpoint.
        assert!(parse_download_payload("1024 1 h0 h1").is_err());
    }

    #[test]
    fn test_resolve_dest_against_directory() {
        let dir = std::env::temp_dir();
        assert_eq!(resolve_dest(&dir, "f.bin"), dir.join("f.bin"));
        let explicit = dir.join("renamed.bin");
        assert_eq!(resolve_dest(&explicit, "f.bin"), explicit);
    }
}
