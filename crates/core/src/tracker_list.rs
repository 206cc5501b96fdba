use std::fs;
use std::path::Path;

use crate::error::{SwarmError, SwarmResult};

/// A `host:port` endpoint as written in a tracker-info file or advertised
/// by a seeder at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse `ip:port`; both halves must be present.
    pub fn parse(text: &str) -> SwarmResult<Endpoint> {
        let (ip, port) = text
            .rsplit_once(':')
            .ok_or_else(|| SwarmError::Validation(format!("invalid ip:port '{text}'")))?;
        if ip.is_empty() {
            return Err(SwarmError::Validation(format!("invalid ip:port '{text}'")));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| SwarmError::Validation(format!("invalid port in '{text}'")))?;
        Ok(Endpoint { ip: ip.to_string(), port })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Pick the `index`-th (1-based) `ip:port` line of a tracker-info file.
pub fn select_tracker(path: &Path, index: usize) -> SwarmResult<Endpoint> {
    if index == 0 {
        return Err(SwarmError::validation("tracker index is 1-based"));
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| SwarmError::Validation(format!("reading {}: {e}", path.display())))?;
    let line = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .nth(index - 1)
        .ok_or_else(|| {
            SwarmError::Validation(format!("tracker {index} is not defined in {}", path.display()))
        })?;
    Endpoint::parse(line)
}

#[cfg(test)]
mod unit_tests {
    use std::io::Write;

    use super::*;

    fn info_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("swarm_tl_{name}_{}", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_endpoint_parse() {
        let ep = Endpoint::parse("127.0.0.1:6000").unwrap();
        assert_eq!(ep.ip, "127.0.0.1");
        assert_eq!(ep.port, 6000);
        assert_eq!(ep.to_string(), "127.0.0.1:6000");
    }

    #[test]
    fn test_endpoint_parse_rejects_garbage() {
        assert!(Endpoint::parse("no-port").is_err());
        assert!(Endpoint::parse(":7000").is_err());
        assert!(Endpoint::parse("1.2.3.4:notanumber").is_err());
    }

    #[test]
    fn test_select_tracker_by_index() {
        let path = info_file("pick", "10.0.0.1:7000\n10.0.0.2:7001\n");
        assert_eq!(select_tracker(&path, 1).unwrap().to_string(), "10.0.0.1:7000");
        assert_eq!(select_tracker(&path, 2).unwrap().to_string(), "10.0.0.2:7001");
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_select_tracker_out_of_range() {
        let path = info_file("range", "10.0.0.1:7000\n");
        assert!(select_tracker(&path, 2).is_err());
        assert!(select_tracker(&path, 0).is_err());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_select_tracker_missing_file() {
        let path = std::env::temp_dir().join("swarm_tl_does_not_exist");
        assert!(select_tracker(&path, 1).is_err());
    }
}
