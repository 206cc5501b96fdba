use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use swarm_core::{SwarmError, SwarmResult};

/// One registered file inside a group. `hashes[0]` is the whole-file hash,
/// `hashes[1..]` the per-piece hashes. The entry lives as long as at least
/// one user advertises the file.
#[derive(Clone)]
pub struct FileEntry {
    pub size: u64,
    pub hashes: Vec<String>,
    pub advertisers: HashSet<String>,
}

/// A membership group. The admin is always the first participant.
pub struct Group {
    pub participants: Vec<String>,
    pub pending: HashSet<String>,
    pub files: HashMap<String, FileEntry>,
}

impl Group {
    fn admin(&self) -> Option<&String> {
        self.participants.first()
    }

    fn is_participant(&self, user: &str) -> bool {
        self.participants.iter().any(|p| p == user)
    }
}

/// The group table, guarded by a single lock. Every operation validates
/// before it mutates; a failed call leaves the table untouched.
pub struct Groups {
    groups: Mutex<HashMap<String, Group>>,
}

impl Groups {
    pub fn new() -> Groups {
        Groups { groups: Mutex::new(HashMap::new()) }
    }

    pub fn create(&self, name: &str, creator: &str) -> SwarmResult<()> {
        let mut groups = self.groups.lock().unwrap();
        if groups.contains_key(name) {
            return Err(SwarmError::validation("group already exists"));
        }
        groups.insert(
            name.to_string(),
            Group {
                participants: vec![creator.to_string()],
                pending: HashSet::new(),
                files: HashMap::new(),
            },
        );
        Ok(())
    }

    pub fn join(&self, name: &str, user: &str) -> SwarmResult<()> {
        let mut groups = self.groups.lock().unwrap();
        let group = get_mut(&mut groups, name)?;
        if group.is_participant(user) {
            return Err(SwarmError::validation("already a participant of this group"));
        }
        if !group.pending.insert(user.to_string()) {
            return Err(SwarmError::validation("join request already pending"));
        }
        Ok(())
    }

    /// Admin-only: pending join requests.
    pub fn pending_of(&self, name: &str, caller: &str) -> SwarmResult<Vec<String>> {
        let groups = self.groups.lock().unwrap();
        let group = get(&groups, name)?;
        require_admin(group, caller)?;
        let mut pending: Vec<String> = group.pending.iter().cloned().collect();
        pending.sort();
        Ok(pending)
    }

    /// Admin-only: promote a pending user to participant.
    pub fn accept(&self, name: &str, pending_user: &str, caller: &str) -> SwarmResult<()> {
        let mut groups = self.groups.lock().unwrap();
        let group = get_mut(&mut groups, name)?;
        require_admin(group, caller)?;
        if !group.pending.remove(pending_user) {
            return Err(SwarmError::validation("no pending request from this user"));
        }
        group.participants.push(pending_user.to_string());
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a participant. The departing user's advertisements in this
    /// group are withdrawn; when the admin leaves, the next participant
    /// becomes admin by taking the head of the list.
    pub fn leave(&self, name: &str, user: &str) -> SwarmResult<()> {
        let mut groups = self.groups.lock().unwrap();
        let group = get_mut(&mut groups, name)?;
        let pos = group
            .participants
            .iter()
            .position(|p| p == user)
            .ok_or_else(|| SwarmError::validation("not a participant of this group"))?;
        group.participants.remove(pos);
        group.files.retain(|_, entry| {
            entry.advertisers.remove(user);
            !entry.advertisers.is_empty()
        });
        Ok(())
    }

    /// Participant-only: file names registered in the group.
    pub fn files_of(&self, name: &str, caller: &str) -> SwarmResult<Vec<String>> {
        let groups = self.groups.lock().unwrap();
        let group = get(&groups, name)?;
        require_participant(group, caller)?;
        let mut files: Vec<String> = group.files.keys().cloned().collect();
        files.sort();
        Ok(files)
    }

    /// Register a file or add an advertiser to an existing registration.
    /// The first uploader fixes size and hashes; later uploaders must
    /// present the same ones.
    pub fn upload(
        &self,
        name: &str,
        caller: &str,
        file: &str,
        size: u64,
        hashes: Vec<String>,
    ) -> SwarmResult<()> {
        let mut groups = self.groups.lock().unwrap();
        let group = get_mut(&mut groups, name)?;
        require_participant(group, caller)?;
        match group.files.get_mut(file) {
            Some(entry) => {
                if entry.size != size || entry.hashes != hashes {
                    return Err(SwarmError::validation(
                        "file is already registered with different contents",
                    ));
                }
                entry.advertisers.insert(caller.to_string());
            }
            None => {
                let mut advertisers = HashSet::new();
                advertisers.insert(caller.to_string());
                group.files.insert(file.to_string(), FileEntry { size, hashes, advertisers });
            }
        }
        Ok(())
    }

    /// Participant-only: metadata and current advertisers of a file.
    pub fn download_info(&self, name: &str, caller: &str, file: &str) -> SwarmResult<FileEntry> {
        let groups = self.groups.lock().unwrap();
        let group = get(&groups, name)?;
        require_participant(group, caller)?;
        group
            .files
            .get(file)
            .cloned()
            .ok_or_else(|| SwarmError::validation("no such file in this group"))
    }

    /// Withdraw the caller's advertisement; the registry entry is dropped
    /// once nobody advertises the file.
    pub fn stop_share(&self, name: &str, caller: &str, file: &str) -> SwarmResult<()> {
        let mut groups = self.groups.lock().unwrap();
        let group = get_mut(&mut groups, name)?;
        let entry = group
            .files
            .get_mut(file)
            .ok_or_else(|| SwarmError::validation("no such file in this group"))?;
        if !entry.advertisers.remove(caller) {
            return Err(SwarmError::validation("you are not sharing this file"));
        }
        if entry.advertisers.is_empty() {
            group.files.remove(file);
        }
        Ok(())
    }
}

impl Default for Groups {
    fn default() -> Self {
        Groups::new()
    }
}

fn get<'a>(groups: &'a HashMap<String, Group>, name: &str) -> SwarmResult<&'a Group> {
    groups
        .get(name)
        .ok_or_else(|| SwarmError::validation("no such group"))
}

fn get_mut<'a>(groups: &'a mut HashMap<String, Group>, name: &str) -> SwarmResult<&'a mut Group> {
    groups
        .get_mut(name)
        .ok_or_else(|| SwarmError::validation("no such group"))
}

fn require_admin(group: &Group, caller: &str) -> SwarmResult<()> {
    if group.admin().map(String::as_str) == Some(caller) {
        Ok(())
    } else {
        Err(SwarmError::auth("not authorized: only the group admin may do this"))
    }
}

fn require_participant(group: &Group, caller: &str) -> SwarmResult<()> {
    if group.is_participant(caller) {
        Ok(())
    } else {
        Err(SwarmError::validation("not a participant of this group"))
    }
}
