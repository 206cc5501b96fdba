use std::net::TcpListener;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::{Arg, ArgMatches, Command};
use colored::Colorize;
use swarm_core::tracker_list::select_tracker;
use swarm_core::utils::Logger;
use swarm_core::{SwarmError, SwarmResult};
use swarm_tracker::commands::TrackerState;
use swarm_tracker::server;

fn create_command() -> Command {
    Command::new("tracker")
        .about("Central metadata tracker for the group file-sharing network")
        .arg(
            Arg::new("TRACKER_INFO")
                .help("File with one tracker ip:port per line")
                .required(true)
                .value_name("FILE"),
        )
        .arg(
            Arg::new("TRACKER_INDEX")
                .help("1-based line of the info file this instance binds to")
                .required(true)
                .value_name("INDEX"),
        )
}

fn run(matches: &ArgMatches) -> SwarmResult<()> {
    let info_file = PathBuf::from(matches.get_one::<String>("TRACKER_INFO").unwrap());
    let index: usize = matches
        .get_one::<String>("TRACKER_INDEX")
        .unwrap()
        .parse()
        .map_err(|_| SwarmError::validation("tracker index is not a number"))?;

    let endpoint = select_tracker(&info_file, index)?;
    let logger = Arc::new(Logger::create(&endpoint.to_string(), "tracker")?);

    let listener = TcpListener::bind((endpoint.ip.as_str(), endpoint.port))
        .map_err(|e| SwarmError::Transport(format!("binding {endpoint}: {e}")))?;

    println!("{}", format!("Tracker listening on {endpoint}").green());
    logger.success(format!("tracker listening on {endpoint}"));

    server::serve(listener, Arc::new(TrackerState::new()), logger);
    Ok(())
}

fn main() {
    let matches = create_command().get_matches();
    if let Err(e) = run(&matches) {
        eprintln!("{}", format!("Error: {e}").red());
        exit(1);
    }
}
