use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::models::users::Users;
use crate::settings::Storage;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no backup available in {0}")]
    NoBackup(String),
}

/// JSON document store for the user mapping, with rolling full-snapshot backups.
#[derive(Debug, Clone)]
pub struct UserStore {
    data_file: PathBuf,
    backup_dir: PathBuf,
    max_backups: usize,
}

impl UserStore {
    pub fn new(
        data_file: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        max_backups: usize,
    ) -> Result<Self, StoreError> {
        let store = Self {
            data_file: data_file.into(),
            backup_dir: backup_dir.into(),
            max_backups: max_backups.max(1),
        };
        fs::create_dir_all(&store.backup_dir)?;

        Ok(store)
    }

    pub fn from_settings(storage: &Storage) -> Result<Self, StoreError> {
        Self::new(
            &storage.data_file,
            &storage.backup_dir,
            storage.max_backups,
        )
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    /// Returns the stored mapping, or an empty one when nothing was saved yet.
    ///
    /// An unparseable primary file triggers a single restore from the newest
    /// backup. If that fails too the store degrades to an empty mapping.
    pub fn load(&self) -> Result<Users, StoreError> {
        if !self.data_file.exists() {
            return Ok(Users::new());
        }

        match self.read_primary() {
            Ok(users) => Ok(users),
            Err(StoreError::Serde(e)) => {
                log::error!(
                    "User data at {} is corrupt ({}), restoring latest backup.",
                    self.data_file.display(),
                    e
                );
                self.recover()
            }
            Err(e) => Err(e),
        }
    }

    fn recover(&self) -> Result<Users, StoreError> {
        let backup = match self.restore_latest_backup() {
            Ok(backup) => backup,
            Err(e) => {
                log::error!("Could not restore user data: {}. Starting empty.", e);
                return Ok(Users::new());
            }
        };

        match self.read_primary() {
            Ok(users) => {
                log::warn!(
                    "Restored {} users from backup {}.",
                    users.len(),
                    backup.display()
                );
                Ok(users)
            }
            Err(e) => {
                log::error!(
                    "Backup {} is unreadable too ({}). Starting empty.",
                    backup.display(),
                    e
                );
                Ok(Users::new())
            }
        }
    }

    fn read_primary(&self) -> Result<Users, StoreError> {
        let data = fs::read_to_string(&self.data_file)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Backs up the current file, then replaces it with `users`.
    pub fn save(&self, users: &Users) -> Result<(), StoreError> {
        self.backup()?;

        let data = serde_json::to_string_pretty(users)?;
        let tmp = self.data_file.with_extension("json.tmp");
        if let Some(parent) = self.data_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.data_file)?;

        Ok(())
    }

    /// Copies the current primary file into the backup directory. Returns
    /// `None` when there is nothing to back up.
    pub fn backup(&self) -> Result<Option<PathBuf>, StoreError> {
        if !self.data_file.exists() {
            return Ok(None);
        }

        fs::create_dir_all(&self.backup_dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S_%6f");
        let path = self
            .backup_dir
            .join(format!("{}{}.json", self.backup_prefix(), timestamp));
        fs::copy(&self.data_file, &path)?;

        self.prune_backups()?;

        Ok(Some(path))
    }

    /// Backup files, oldest first.
    pub fn backups(&self) -> Result<Vec<PathBuf>, StoreError> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = self.backup_prefix();
        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            let is_backup = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix) && n.ends_with(".json"))
                .unwrap_or(false);
            if is_backup {
                backups.push(path);
            }
        }
        backups.sort();

        Ok(backups)
    }

    fn prune_backups(&self) -> Result<(), StoreError> {
        let backups = self.backups()?;
        if backups.len() <= self.max_backups {
            return Ok(());
        }

        let excess = backups.len() - self.max_backups;
        for old in &backups[..excess] {
            if let Err(e) = fs::remove_file(old) {
                log::warn!("Could not remove old backup {}: {}", old.display(), e);
            }
        }

        Ok(())
    }

    /// Copies the newest backup over the primary file.
    pub fn restore_latest_backup(&self) -> Result<PathBuf, StoreError> {
        let latest = self
            .backups()?
            .pop()
            .ok_or_else(|| StoreError::NoBackup(self.backup_dir.display().to_string()))?;
        fs::copy(&latest, &self.data_file)?;

        Ok(latest)
    }

    /// Operator rollback: like `restore_latest_backup`, but the current
    /// primary is snapshotted first so the rollback itself can be undone.
    pub fn rollback_to_latest_backup(&self) -> Result<PathBuf, StoreError> {
        let latest = self
            .backups()?
            .pop()
            .ok_or_else(|| StoreError::NoBackup(self.backup_dir.display().to_string()))?;
        // Read before snapshotting: pruning may delete `latest`.
        let data = fs::read(&latest)?;

        self.backup()?;

        let tmp = self.data_file.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.data_file)?;

        Ok(latest)
    }

    fn backup_prefix(&self) -> String {
        let stem = self
            .data_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("user_data");
        format!("{}_", stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::UserRecord;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn store(dir: &Path) -> UserStore {
        UserStore::new(dir.join("user_data.json"), dir.join("backups"), 5).unwrap()
    }

    fn users(ids: &[&str]) -> Users {
        let now = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        ids.iter()
            .map(|id| {
                let mut record = UserRecord::new(Some(format!("name {}", id)), None, now);
                record.referrals.push(format!("{}0", id));
                record.points = 1;
                (id.to_string(), record)
            })
            .collect()
    }

    #[test]
    fn load_without_file_is_empty() {
        let dir = tempdir().unwrap();
        assert!(store(dir.path()).load().unwrap().is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        for ids in [vec![], vec!["1"], vec!["1", "2", "3", "4"]] {
            let expected = users(&ids);
            store.save(&expected).unwrap();
            assert_eq!(store.load().unwrap(), expected);
        }
    }

    #[test]
    fn keeps_only_newest_backups() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        for i in 0..8 {
            let id = i.to_string();
            store.save(&users(&[id.as_str()])).unwrap();
        }

        let backups = store.backups().unwrap();
        assert_eq!(backups.len(), 5);

        // The newest backup holds the mapping written just before the last save.
        let newest: Users =
            serde_json::from_str(&fs::read_to_string(backups.last().unwrap()).unwrap()).unwrap();
        assert_eq!(newest, users(&["6"]));
    }

    #[test]
    fn corrupt_primary_is_restored_from_latest_backup() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        store.save(&users(&["1"])).unwrap();
        store.save(&users(&["1", "2"])).unwrap();
        store.save(&users(&["1", "2", "3"])).unwrap();
        fs::write(store.data_file(), "{ not json").unwrap();

        assert_eq!(store.load().unwrap(), users(&["1", "2"]));
        // The primary file now holds the restored content.
        let on_disk: Users =
            serde_json::from_str(&fs::read_to_string(store.data_file()).unwrap()).unwrap();
        assert_eq!(on_disk, users(&["1", "2"]));
    }

    #[test]
    fn corrupt_primary_without_backup_degrades_to_empty() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.data_file(), "[1, 2").unwrap();

        assert!(store.load().unwrap().is_empty());
        assert!(matches!(
            store.restore_latest_backup(),
            Err(StoreError::NoBackup(_))
        ));
    }

    #[test]
    fn failed_backup_leaves_primary_untouched() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save(&users(&["1"])).unwrap();

        fs::remove_dir_all(dir.path().join("backups")).unwrap();
        fs::write(dir.path().join("backups"), "not a directory").unwrap();

        assert!(matches!(
            store.save(&users(&["1", "2"])),
            Err(StoreError::Io(_))
        ));
        assert_eq!(store.load().unwrap(), users(&["1"]));
    }

    #[test]
    fn rollback_snapshots_current_state_first() {
        let dir = tempdir().unwrap();
        let store =
            UserStore::new(dir.path().join("user_data.json"), dir.path().join("backups"), 1)
                .unwrap();

        store.save(&users(&["1"])).unwrap();
        store.save(&users(&["1", "2"])).unwrap();

        store.rollback_to_latest_backup().unwrap();
        assert_eq!(store.load().unwrap(), users(&["1"]));

        // With a single retained backup, that backup is now the replaced state.
        let backups = store.backups().unwrap();
        assert_eq!(backups.len(), 1);
        let kept: Users = serde_json::from_str(&fs::read_to_string(&backups[0]).unwrap()).unwrap();
        assert_eq!(kept, users(&["1", "2"]));
    }

    #[test]
    fn ignores_unrelated_files_in_backup_dir() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        fs::write(dir.path().join("backups").join("notes.txt"), "x").unwrap();

        store.save(&users(&["1"])).unwrap();
        store.save(&users(&["2"])).unwrap();

        assert_eq!(store.backups().unwrap().len(), 1);
    }
}
