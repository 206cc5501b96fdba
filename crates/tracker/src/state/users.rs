use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use swarm_core::{SwarmError, SwarmResult};

struct UserRecord {
    password: String,
    groups: HashSet<String>,
}

/// Registry of users and live sessions. Users are never deleted; a session
/// maps a logged-in user to the seeder endpoint they advertised at login
/// and exists only between `login` and `logout`.
pub struct Users {
    users: Mutex<HashMap<String, UserRecord>>,
    sessions: Mutex<HashMap<String, String>>,
}

impl Users {
    pub fn new() -> Users {
        Users {
            users: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn create_user(&self, name: &str, password: &str) -> SwarmResult<()> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(name) {
            return Err(SwarmError::validation("user already exists"));
        }
        users.insert(
            name.to_string(),
            UserRecord { password: password.to_string(), groups: HashSet::new() },
        );
        Ok(())
    }

    pub fn verify_password(&self, name: &str, password: &str) -> SwarmResult<()> {
        let users = self.users.lock().unwrap();
        match users.get(name) {
            Some(record) if record.password == password => Ok(()),
            _ => Err(SwarmError::auth("invalid user-name or password")),
        }
    }

    /// Record the advertised seeder endpoint for a freshly logged-in user.
    pub fn open_session(&self, name: &str, endpoint: &str) {
        self.sessions
            .lock()
            .unwrap()
            .insert(name.to_string(), endpoint.to_string());
    }

    /// Forget the session. Tokens for this user stop validating even
    /// though the HMAC stays intact until expiry.
    pub fn close_session(&self, name: &str) -> SwarmResult<()> {
        match self.sessions.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(SwarmError::auth("no active session for this user")),
        }
    }

    pub fn has_session(&self, name: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(name)
    }

    pub fn endpoint_of(&self, name: &str) -> Option<String> {
        self.sessions.lock().unwrap().get(name).cloned()
    }

    pub fn note_joined(&self, name: &str, group: &str) {
        if let Some(record) = self.users.lock().unwrap().get_mut(name) {
            record.groups.insert(group.to_string());
        }
    }

    pub fn note_left(&self, name: &str, group: &str) {
        if let Some(record) = self.users.lock().unwrap().get_mut(name) {
            record.groups.remove(group);
        }
    }
}

impl Default for Users {
    fn default() -> Self {
        Users::new()
    }
}
