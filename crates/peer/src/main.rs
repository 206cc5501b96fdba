use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::thread;

use clap::{Arg, ArgMatches, Command};
use colored::Colorize;
use swarm_core::tracker_list::{select_tracker, Endpoint};
use swarm_core::utils::Logger;
use swarm_core::{SwarmError, SwarmResult};
use swarm_peer::download::DownloadRegistry;
use swarm_peer::piece_index::SharedPieceIndex;
use swarm_peer::seeder;
use swarm_peer::shell::Leecher;

fn create_command() -> Command {
    Command::new("peer")
        .about("Peer of the group file-sharing network: seeder and leecher in one process")
        .arg(
            Arg::new("SEEDER")
                .help("ip:port this peer's seeder listens and advertises on")
                .required(true)
                .value_name("IP:PORT"),
        )
        .arg(
            Arg::new("TRACKER_INFO")
                .help("File with one tracker ip:port per line")
                .required(true)
                .value_name("FILE"),
        )
        .arg(
            Arg::new("TRACKER_INDEX")
                .help("1-based line of the info file selecting the tracker")
                .required(true)
                .value_name("INDEX"),
        )
}

fn run(matches: &ArgMatches) -> SwarmResult<()> {
    let seeder_endpoint = Endpoint::parse(matches.get_one::<String>("SEEDER").unwrap())?;
    let info_file = PathBuf::from(matches.get_one::<String>("TRACKER_INFO").unwrap());
    let index: usize = matches
        .get_one::<String>("TRACKER_INDEX")
        .unwrap()
        .parse()
        .map_err(|_| SwarmError::validation("tracker index is not a number"))?;
    let tracker_endpoint = select_tracker(&info_file, index)?;

    let tag = seeder_endpoint.to_string();
    let general = Logger::create(&tag, "general")?;
    let seeder_logger = Arc::new(Logger::create(&tag, "seeder")?);
    let leecher_logger = Arc::new(Logger::create(&tag, "leecher")?);

    let piece_index = Arc::new(SharedPieceIndex::new());
    let registry = Arc::new(DownloadRegistry::new());

    // The seeder half serves the shared piece index the whole session.
    let listener = TcpListener::bind((seeder_endpoint.ip.as_str(), seeder_endpoint.port))
        .map_err(|e| SwarmError::Transport(format!("binding seeder {seeder_endpoint}: {e}")))?;
    general.success(format!("seeder listening on {seeder_endpoint}"));
    println!("{}", format!("Seeder listening on {seeder_endpoint}").green());
    {
        let piece_index = piece_index.clone();
        let seeder_logger = seeder_logger.clone();
        thread::spawn(move || seeder::serve(listener, piece_index, seeder_logger));
    }

    let tracker = TcpStream::connect((tracker_endpoint.ip.as_str(), tracker_endpoint.port))
        .map_err(|e| SwarmError::Transport(format!("connecting tracker {tracker_endpoint}: {e}")))?;
    general.success(format!("connected to tracker at {tracker_endpoint}"));
    println!("{}", format!("Connected to tracker at {tracker_endpoint}").green());

    let mut leecher = Leecher::new(
        tracker,
        seeder_endpoint.to_string(),
        piece_index,
        registry,
        leecher_logger,
    );
    leecher.run();
    Ok(())
}

fn main() {
    let matches = create_command().get_matches();
    if let Err(e) = run(&matches) {
        eprintln!("{}", format!("Error: {e}").red());
        exit(1);
    }
    exit(0);
}
