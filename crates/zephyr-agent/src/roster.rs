use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use zephyr_process::Player;

#[derive(Debug, Default)]
struct RosterInner {
    players: BTreeMap<String, Player>,
    /// Bumped on every clear so late gate results from an older session can be dropped.
    epoch: u64,
}

/// Live set of online players keyed by name. The lock is never held across
/// an await point.
#[derive(Debug, Default)]
pub struct Roster {
    inner: RwLock<RosterInner>,
}

impl Roster {
    fn read(&self) -> RwLockReadGuard<'_, RosterInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RosterInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Upsert; returns true if the roster changed.
    pub fn add(&self, player: Player) -> bool {
        let mut inner = self.write();
        let prev = inner.players.insert(player.name.clone(), player.clone());
        prev.as_ref() != Some(&player)
    }

    /// Adds only if no clear happened since `epoch` was read.
    pub fn add_if_epoch(&self, epoch: u64, player: Player) -> bool {
        let mut inner = self.write();
        if inner.epoch != epoch {
            return false;
        }
        inner.players.insert(player.name.clone(), player);
        true
    }

    pub fn remove(&self, name: &str) -> bool {
        self.write().players.remove(name).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.players.clear();
        inner.epoch = inner.epoch.wrapping_add(1);
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    pub fn snapshot(&self) -> Vec<Player> {
        self.read().players.values().cloned().collect()
    }

    pub fn names(&self) -> HashSet<String> {
        self.read().players.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().players.len()
    }
}
