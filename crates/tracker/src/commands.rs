use std::time::Duration;

use swarm_core::hashing::piece_count;
use swarm_core::token;
use swarm_core::tracker_list::Endpoint;
use swarm_core::{SwarmError, SwarmResult};

use crate::state::{Groups, Users};

/// Everything the command handlers touch: the two state tables plus the
/// token parameters. Commands that need both tables go to `users` first,
/// then `groups`, and never hold both locks at once.
pub struct TrackerState {
    pub users: Users,
    pub groups: Groups,
    secret: Vec<u8>,
    ttl: Duration,
}

impl TrackerState {
    pub fn new() -> TrackerState {
        TrackerState::with_auth(swarm_config::hmac_secret(), swarm_config::token_ttl())
    }

    pub fn with_auth(secret: Vec<u8>, ttl: Duration) -> TrackerState {
        TrackerState { users: Users::new(), groups: Groups::new(), secret, ttl }
    }

    /// Validate a token and require a live session: logging out revokes a
    /// token even though its HMAC stays verifiable until expiry.
    fn authenticate(&self, tok: &str) -> SwarmResult<String> {
        let user = token::validate(tok, &self.secret)?;
        if !self.users.has_session(&user) {
            return Err(SwarmError::auth("invalid/expired token"));
        }
        Ok(user)
    }
}

impl Default for TrackerState {
    fn default() -> Self {
        TrackerState::new()
    }
}

/// Run one command line and format the framed response payload. Nothing a
/// client sends can escalate past this boundary.
pub fn execute(state: &TrackerState, line: &str) -> String {
    match dispatch(state, line) {
        Ok(payload) if payload.is_empty() => "Success:".to_string(),
        Ok(payload) => format!("Success: {payload}"),
        Err(e) => format!("Error: {e}"),
    }
}

fn dispatch(state: &TrackerState, line: &str) -> SwarmResult<String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let verb = *tokens.first().ok_or_else(|| SwarmError::validation("empty command"))?;
    let args = &tokens[1..];

    match verb {
        "create_user" => create_user(state, args),
        "login" => login(state, args),
        "logout" => logout(state, args),
        "create_group" => create_group(state, args),
        "join_group" => join_group(state, args),
        "list_requests" => list_requests(state, args),
        "accept_request" => accept_request(state, args),
        "list_groups" => list_groups(state, args),
        "leave_group" => leave_group(state, args),
        "list_files" => list_files(state, args),
        "upload_file" => upload_file(state, args),
        "download_file" => download_file(state, args),
        "stop_share" => stop_share(state, args),
        _ => Err(SwarmError::validation("unknown command")),
    }
}

fn expect_arity(args: &[&str], n: usize, usage: &str) -> SwarmResult<()> {
    if args.len() == n {
        Ok(())
    } else {
        Err(SwarmError::Validation(format!("usage: {usage}")))
    }
}

fn create_user(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 2, "create_user <user> <password>")?;
    state.users.create_user(args[0], args[1])?;
    Ok(format!("user {} created", args[0]))
}

fn login(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 3, "login <user> <password> <ip:port>")?;
    let (user, password, endpoint) = (args[0], args[1], args[2]);
    Endpoint::parse(endpoint)?;
    state.users.verify_password(user, password)?;
    let tok = token::issue(user, state.ttl, &state.secret);
    state.users.open_session(user, endpoint);
    // The token must be the second whitespace token of the full payload;
    // the shell strips it before display.
    Ok(format!("{tok} login successful"))
}

fn logout(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 1, "logout <token>")?;
    let user = token::validate(args[0], &state.secret)?;
    state.users.close_session(&user)?;
    Ok("logged out".to_string())
}

fn create_group(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 2, "create_group <group> <token>")?;
    let user = state.authenticate(args[1])?;
    state.groups.create(args[0], &user)?;
    state.users.note_joined(&user, args[0]);
    Ok(format!("group {} created", args[0]))
}

fn join_group(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 2, "join_group <group> <token>")?;
    let user = state.authenticate(args[1])?;
    state.groups.join(args[0], &user)?;
    Ok("join request sent to the group admin".to_string())
}

fn list_requests(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 2, "list_requests <group> <token>")?;
    let user = state.authenticate(args[1])?;
    Ok(state.groups.pending_of(args[0], &user)?.join(" "))
}

fn accept_request(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 3, "accept_request <group> <user> <token>")?;
    let user = state.authenticate(args[2])?;
    state.groups.accept(args[0], args[1], &user)?;
    state.users.note_joined(args[1], args[0]);
    Ok(format!("{} is now a participant of {}", args[1], args[0]))
}

fn list_groups(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 1, "list_groups <token>")?;
    state.authenticate(args[0])?;
    Ok(state.groups.names().join(" "))
}

fn leave_group(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 2, "leave_group <group> <token>")?;
    let user = state.authenticate(args[1])?;
    state.groups.leave(args[0], &user)?;
    state.users.note_left(&user, args[0]);
    Ok(format!("left group {}", args[0]))
}

fn list_files(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 2, "list_files <group> <token>")?;
    let user = state.authenticate(args[1])?;
    Ok(state.groups.files_of(args[0], &user)?.join(" "))
}

fn upload_file(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    // upload_file <file> <group> <size> <hash0> .. <hashN> <token>
    if args.len() < 5 {
        return Err(SwarmError::validation(
            "usage: upload_file <file> <group> <size> <hashes..> <token>",
        ));
    }
    let (file, group) = (args[0], args[1]);
    let size: u64 = args[2]
        .parse()
        .map_err(|_| SwarmError::validation("file size is not a number"))?;
    let user = state.authenticate(args[args.len() - 1])?;
    let hashes: Vec<String> = args[3..args.len() - 1].iter().map(|s| s.to_string()).collect();
    if hashes.len() as u32 != piece_count(size) + 1 {
        return Err(SwarmError::validation("hash count does not match file size"));
    }
    state.groups.upload(group, &user, file, size, hashes)?;
    Ok(format!("file {file} uploaded to {group}"))
}

fn download_file(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 3, "download_file <file> <group> <token>")?;
    let (file, group) = (args[0], args[1]);
    let user = state.authenticate(args[2])?;
    let entry = state.groups.download_info(group, &user, file)?;

    // Only advertisers with a live session can actually serve pieces.
    let endpoints: Vec<String> = entry
        .advertisers
        .iter()
        .filter_map(|name| state.users.endpoint_of(name))
        .collect();
    if endpoints.is_empty() {
        return Err(SwarmError::validation("no active seeder for this file"));
    }

    let n = piece_count(entry.size);
    Ok(format!(
        "{} {} {} {}",
        entry.size,
        n,
        entry.hashes.join(" "),
        endpoints.join(" ")
    ))
}

fn stop_share(state: &TrackerState, args: &[&str]) -> SwarmResult<String> {
    expect_arity(args, 3, "stop_share <group> <file> <token>")?;
    let user = state.authenticate(args[2])?;
    state.groups.stop_share(args[0], &user, args[1])?;
    Ok(format!("stopped sharing {}", args[1]))
}

#[cfg(test)]
mod unit_tests {
    use std::thread;

    use super::*;

    const SECRET: &[u8] = b"tracker-test-secret";

    fn state() -> TrackerState {
        TrackerState::with_auth(SECRET.to_vec(), Duration::from_secs(600))
    }

    fn login_as(state: &TrackerState, user: &str, port: u16) -> String {
        assert_ok(&execute(state, &format!("create_user {user} pw")));
        let response = execute(state, &format!("login {user} pw 127.0.0.1:{port}"));
        assert_ok(&response);
        response.split_whitespace().nth(1).unwrap().to_string()
    }

    fn assert_ok(response: &str) {
        assert!(response.starts_with("Success:"), "unexpected: {response}");
    }

    fn assert_err(response: &str) {
        assert!(response.starts_with("Error: "), "unexpected: {response}");
    }

    #[test]
    fn test_unknown_verb_and_empty_command() {
        let st = state();
        assert_err(&execute(&st, "frobnicate a b"));
        assert_err(&execute(&st, "   "));
    }

    #[test]
    fn test_create_user_twice() {
        let st = state();
        assert_ok(&execute(&st, "create_user alice pw"));
        assert_err(&execute(&st, "create_user alice pw"));
    }

    #[test]
    fn test_login_rejects_bad_credentials() {
        let st = state();
        assert_ok(&execute(&st, "create_user alice pw"));
        assert_err(&execute(&st, "login alice wrong 127.0.0.1:9000"));
        assert_err(&execute(&st, "login ghost pw 127.0.0.1:9000"));
        assert_err(&execute(&st, "login alice pw not-an-endpoint"));
    }

    #[test]
    fn test_token_round_trip_through_commands() {
        let st = state();
        let tok = login_as(&st, "alice", 9001);
        assert_ok(&execute(&st, &format!("create_group g {tok}")));
        assert_ok(&execute(&st, &format!("list_groups {tok}")));
    }

    #[test]
    fn test_logout_revokes_token_before_expiry() {
        let st = state();
        let tok = login_as(&st, "alice", 9002);
        assert_ok(&execute(&st, &format!("logout {tok}")));
        // The HMAC is still valid but the session is gone.
        assert_err(&execute(&st, &format!("create_group g {tok}")));
        assert_err(&execute(&st, &format!("logout {tok}")));
    }

    #[test]
    fn test_expired_token_is_rejected_and_state_untouched() {
        let st = TrackerState::with_auth(SECRET.to_vec(), Duration::from_secs(1));
        let tok = login_as(&st, "alice", 9003);
        thread::sleep(Duration::from_secs(2));
        assert_err(&execute(&st, &format!("create_group g {tok}")));
        // No group was created; a fresh login sees an empty listing.
        let tok2 = {
            let response = execute(&st, "login alice pw 127.0.0.1:9003");
            assert_ok(&response);
            response.split_whitespace().nth(1).unwrap().to_string()
        };
        assert_eq!(execute(&st, &format!("list_groups {tok2}")), "Success:");
    }

    #[test]
    fn test_admin_enforcement_flow() {
        let st = state();
        let u1 = login_as(&st, "u1", 9004);
        let u2 = login_as(&st, "u2", 9005);
        let u3 = login_as(&st, "u3", 9006);

        assert_ok(&execute(&st, &format!("create_group g {u1}")));
        assert_ok(&execute(&st, &format!("join_group g {u2}")));
        assert_ok(&execute(&st, &format!("join_group g {u3}")));
        assert_ok(&execute(&st, &format!("accept_request g u3 {u1}")));

        // u3 is a participant but not the admin.
        let denied = execute(&st, &format!("accept_request g u2 {u3}"));
        assert_err(&denied);
        assert!(denied.contains("authorized"));
        assert_err(&execute(&st, &format!("list_requests g {u3}")));

        assert_ok(&execute(&st, &format!("accept_request g u2 {u1}")));
        assert_eq!(execute(&st, &format!("list_requests g {u1}")), "Success:");
    }

    #[test]
    fn test_membership_state_machine() {
        let st = state();
        let u1 = login_as(&st, "u1", 9007);
        let u2 = login_as(&st, "u2", 9008);

        assert_ok(&execute(&st, &format!("create_group g {u1}")));
        // leave from "none" and from "pending" are both errors.
        assert_err(&execute(&st, &format!("leave_group g {u2}")));
        assert_ok(&execute(&st, &format!("join_group g {u2}")));
        assert_err(&execute(&st, &format!("leave_group g {u2}")));
        assert_err(&execute(&st, &format!("join_group g {u2}")));

        assert_ok(&execute(&st, &format!("accept_request g u2 {u1}")));
        assert_ok(&execute(&st, &format!("leave_group g {u2}")));
        assert_err(&execute(&st, &format!("leave_group g {u2}")));
    }

    #[test]
    fn test_upload_and_download_round_trip() {
        let st = state();
        let u1 = login_as(&st, "u1", 9009);
        let u2 = login_as(&st, "u2", 9010);

        assert_ok(&execute(&st, &format!("create_group g {u1}")));
        assert_ok(&execute(&st, &format!("join_group g {u2}")));
        assert_ok(&execute(&st, &format!("accept_request g u2 {u1}")));

        // 3500 bytes => 4 pieces => 5 hashes.
        let hashes = "h0 h1 h2 h3 h4";
        assert_ok(&execute(&st, &format!("upload_file f.bin g 3500 {hashes} {u1}")));
        // Wrong hash count for the declared size.
        assert_err(&execute(&st, &format!("upload_file short.bin g 3500 h0 h1 {u1}")));

        let response = execute(&st, &format!("download_file f.bin g {u2}"));
        assert_ok(&response);
        let fields: Vec<&str> = response.split_whitespace().collect();
        assert_eq!(fields[1], "3500");
        assert_eq!(fields[2], "4");
        assert_eq!(&fields[3..8], &["h0", "h1", "h2", "h3", "h4"]);
        assert_eq!(fields[8], "127.0.0.1:9009");

        // Non-participants cannot download or list.
        let u3 = login_as(&st, "u3", 9011);
        assert_err(&execute(&st, &format!("download_file f.bin g {u3}")));
        assert_err(&execute(&st, &format!("list_files g {u3}")));
    }

    #[test]
    fn test_download_requires_a_live_seeder() {
        let st = state();
        let u1 = login_as(&st, "u1", 9012);
        let u2 = login_as(&st, "u2", 9013);
        assert_ok(&execute(&st, &format!("create_group g {u1}")));
        assert_ok(&execute(&st, &format!("join_group g {u2}")));
        assert_ok(&execute(&st, &format!("accept_request g u2 {u1}")));
        assert_ok(&execute(&st, &format!("upload_file f.bin g 1000 h0 h1 {u1}")));

        assert_ok(&execute(&st, &format!("logout {u1}")));
        assert_err(&execute(&st, &format!("download_file f.bin g {u2}")));
    }

    #[test]
    fn test_stop_share_and_registry_cleanup() {
        let st = state();
        let u1 = login_as(&st, "u1", 9014);
        assert_ok(&execute(&st, &format!("create_group g {u1}")));
        assert_ok(&execute(&st, &format!("upload_file f.bin g 1000 h0 h1 {u1}")));
        assert_ok(&execute(&st, &format!("stop_share g f.bin {u1}")));
        assert_eq!(execute(&st, &format!("list_files g {u1}")), "Success:");
        assert_err(&execute(&st, &format!("stop_share g f.bin {u1}")));
    }

    #[test]
    fn test_upload_is_idempotent_per_advertiser_set() {
        let st = state();
        let u1 = login_as(&st, "u1", 9015);
        assert_ok(&execute(&st, &format!("create_group g {u1}")));
        assert_ok(&execute(&st, &format!("upload_file f.bin g 1000 h0 h1 {u1}")));
        assert_ok(&execute(&st, &format!("upload_file f.bin g 1000 h0 h1 {u1}")));
        assert_err(&execute(&st, &format!("upload_file f.bin g 1000 h0 hX {u1}")));
    }
}
