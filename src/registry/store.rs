use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::LocalModel;
use crate::error::{PalError, Result};

/// Name of the symlink the inference server loads.
pub const DESIGNATOR: &str = "model.gguf";

/// Owns the models directory and the single active-model designator.
pub struct ModelStore {
    /// Directory where model files are stored
    models_dir: PathBuf,
    /// Target of the designator, `None` when no model is active
    active: RwLock<Option<PathBuf>>,
}

impl ModelStore {
    /// Creates the directory if needed and reads the current designator.
    pub fn open(models_dir: impl Into<PathBuf>) -> Result<Self> {
        let models_dir = models_dir.into();
        if !models_dir.exists() {
            fs::create_dir_all(&models_dir)?;
            info!("Created models directory: {}", models_dir.display());
        }

        let active = read_designator(&models_dir);
        match &active {
            Some(path) => info!("Active model: {}", path.display()),
            None => debug!("No active model in {}", models_dir.display()),
        }

        Ok(Self {
            models_dir,
            active: RwLock::new(active),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Path the designator points at.
    pub fn active(&self) -> Option<PathBuf> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Full entry for the active model, if it still exists.
    pub fn active_model(&self) -> Result<Option<LocalModel>> {
        Ok(self.list()?.into_iter().find(|m| m.is_active))
    }

    /// Model files in the directory, newest first.
    pub fn list(&self) -> Result<Vec<LocalModel>> {
        let active = self.active();
        let mut models = Vec::new();

        for entry in fs::read_dir(&self.models_dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if !file_type.is_file() || !is_model_file(&path) {
                continue;
            }

            let mut model = match LocalModel::from_path(&path) {
                Ok(model) => model,
                Err(e) => {
                    warn!("Skipping unreadable model file {}: {}", path.display(), e);
                    continue;
                }
            };
            model.is_active = active.as_deref().is_some_and(|a| same_file(a, &path));
            models.push(model);
        }

        models.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.name.cmp(&b.name)));
        Ok(models)
    }

    /// Looks a model up by file name or stem, case-insensitively.
    pub fn find(&self, name: &str) -> Result<Option<LocalModel>> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .find(|m| m.name.to_lowercase() == needle || m.file_name().to_lowercase() == needle))
    }

    /// Points the designator at `model`.
    ///
    /// A fresh link is created under a unique name and renamed over the
    /// designator, so readers never see a missing or half-written link.
    pub fn activate(&self, model: &LocalModel) -> Result<LocalModel> {
        let file_name = model.file_name();
        let target = self.models_dir.join(&file_name);
        if !target.is_file() {
            return Err(PalError::ActivationFailed {
                path: target,
                source: io::Error::new(io::ErrorKind::NotFound, "model file does not exist"),
            });
        }

        let designator = self.models_dir.join(DESIGNATOR);
        let staging = self.models_dir.join(format!(".{}.{}.tmp", DESIGNATOR, Uuid::new_v4()));

        let mut active = self.active.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        replace_link(Path::new(&file_name), &staging, &designator).map_err(|source| {
            let _ = fs::remove_file(&staging);
            PalError::ActivationFailed {
                path: target.clone(),
                source,
            }
        })?;
        *active = Some(target.clone());
        drop(active);

        info!("Activated model {}", file_name);
        let mut activated = LocalModel::from_path(&target)?.with_checksum(model.checksum.clone());
        activated.is_active = true;
        Ok(activated)
    }

    /// Deletes the model file; clears the designator when it was active.
    pub fn remove(&self, model: &LocalModel) -> Result<()> {
        let path = self.models_dir.join(model.file_name());
        let mut active = self.active.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        let was_active = active.as_deref().is_some_and(|a| same_file(a, &path));
        fs::remove_file(&path)?;
        info!("Removed model {}", path.display());

        if was_active {
            match fs::remove_file(self.models_dir.join(DESIGNATOR)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            *active = None;
            info!("Cleared active model designator");
        }
        Ok(())
    }
}

fn is_model_file(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    name != DESIGNATOR && !name.starts_with('.') && name.to_lowercase().ends_with(".gguf")
}

fn read_designator(models_dir: &Path) -> Option<PathBuf> {
    let link = fs::read_link(models_dir.join(DESIGNATOR)).ok()?;
    let target = if link.is_absolute() { link } else { models_dir.join(link) };
    target.is_file().then_some(target)
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(unix)]
fn replace_link(target: &Path, staging: &Path, designator: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, staging)?;
    fs::rename(staging, designator)
}

#[cfg(windows)]
fn replace_link(target: &Path, staging: &Path, designator: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, staging)?;
    match fs::remove_file(designator) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(staging, designator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    #[test]
    fn listing_skips_partials_and_designator() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a-Q4_K_M.gguf", 10);
        touch(dir.path(), "b-Q8_0.gguf.part", 5);
        touch(dir.path(), "notes.txt", 1);

        let store = ModelStore::open(dir.path()).unwrap();
        let a = store.find("a-Q4_K_M").unwrap().unwrap();
        store.activate(&a).unwrap();

        let models = store.list().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].size_bytes, 10);
        assert!(models[0].is_active);
    }

    #[test]
    fn newest_model_is_listed_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "old.gguf", 1);
        sleep(Duration::from_millis(20));
        touch(dir.path(), "new.gguf", 1);

        let store = ModelStore::open(dir.path()).unwrap();
        let names: Vec<_> = store.list().unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, ["new", "old"]);
    }

    #[test]
    fn designator_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "phi.gguf", 3);

        let store = ModelStore::open(dir.path()).unwrap();
        let model = store.find("phi.gguf").unwrap().unwrap();
        store.activate(&model).unwrap();
        drop(store);

        let reopened = ModelStore::open(dir.path()).unwrap();
        assert!(same_file(&reopened.active().unwrap(), &path));
        assert_eq!(reopened.active_model().unwrap().unwrap().name, "phi");
    }

    #[test]
    fn removing_the_active_model_clears_the_designator() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "gone.gguf", 3);
        let store = ModelStore::open(dir.path()).unwrap();
        let model = store.find("gone").unwrap().unwrap();
        store.activate(&model).unwrap();

        store.remove(&model).unwrap();
        assert!(store.active().is_none());
        assert!(fs::symlink_metadata(dir.path().join(DESIGNATOR)).is_err());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn activating_a_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "ghost.gguf", 1);
        let store = ModelStore::open(dir.path()).unwrap();
        let model = store.find("ghost").unwrap().unwrap();
        fs::remove_file(path).unwrap();

        let err = store.activate(&model).unwrap_err();
        assert!(matches!(err, PalError::ActivationFailed { .. }));
        assert!(store.active().is_none());
    }
}
