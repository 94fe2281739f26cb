//! Agent library: directory scan, hot reload, and selection.

pub mod selection;
pub mod watcher;

pub use selection::{cosine, AgentSelector, Embedder, SelectionMatch};
pub use watcher::{FileChange, WatcherHandle};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::agent::{parse_agent_file, write_agent_file, AgentDefinition};
use crate::error::Result;

/// Change notification published to the coordinator.
#[derive(Debug, Clone)]
pub enum LibraryEvent {
    Upserted(AgentDefinition),
    Removed(String),
}

/// Callback receiving library events.
pub type LibraryListener = Arc<dyn Fn(LibraryEvent) + Send + Sync>;

/// Watched catalog of file-backed agent definitions.
///
/// One TOML file per agent. Parse failures keep the previous definition; a
/// full rescan prunes definitions whose files have disappeared.
pub struct AgentLibrary {
    dir: PathBuf,
    definitions: RwLock<HashMap<String, AgentDefinition>>,
    paths: RwLock<HashMap<PathBuf, String>>,
    selector: AgentSelector,
    listener: RwLock<Option<LibraryListener>>,
    watcher: Mutex<Option<WatcherHandle>>,
}

impl AgentLibrary {
    pub fn new(dir: impl Into<PathBuf>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            dir: dir.into(),
            definitions: RwLock::new(HashMap::new()),
            paths: RwLock::new(HashMap::new()),
            selector: AgentSelector::new(embedder),
            listener: RwLock::new(None),
            watcher: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn selector(&self) -> &AgentSelector {
        &self.selector
    }

    /// Register the callback notified on every upsert/remove.
    pub fn set_listener(&self, listener: LibraryListener) {
        *self.listener.write().expect("listener lock poisoned") = Some(listener);
    }

    fn notify(&self, event: LibraryEvent) {
        if let Some(listener) = self
            .listener
            .read()
            .expect("listener lock poisoned")
            .as_ref()
        {
            listener(event);
        }
    }

    /// Scan the directory and publish every parsable definition.
    ///
    /// Returns the number of definitions currently loaded.
    pub fn load_all(&self) -> Result<usize> {
        std::fs::create_dir_all(&self.dir)?;

        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect();
        files.sort();

        for path in files {
            self.upsert_from_file(&path);
        }
        Ok(self.len())
    }

    /// Re-parse everything and prune definitions whose files disappeared.
    pub fn reload_all(&self) -> Result<usize> {
        let known: Vec<PathBuf> = self
            .paths
            .read()
            .expect("paths lock poisoned")
            .keys()
            .cloned()
            .collect();
        for path in known {
            if !path.exists() {
                self.remove_path(&path);
            }
        }
        self.load_all()
    }

    /// Parse one file and publish its definition.
    ///
    /// On parse failure the previous definition (if any) is kept.
    pub fn upsert_from_file(&self, path: &Path) {
        if !path.exists() {
            self.remove_path(path);
            return;
        }

        let def = match parse_agent_file(path) {
            Ok(def) => def,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "agent file unparsable; keeping previous definition"
                );
                return;
            }
        };

        {
            let mut paths = self.paths.write().expect("paths lock poisoned");
            // A file that changed its declared id abandons the old one.
            if let Some(previous_id) = paths.insert(path.to_path_buf(), def.id.clone()) {
                if previous_id != def.id {
                    self.remove_id(&previous_id);
                }
            }
        }

        self.selector.upsert(def.id.clone(), def.descriptor());
        self.definitions
            .write()
            .expect("definitions lock poisoned")
            .insert(def.id.clone(), def.clone());

        tracing::debug!(agent = %def.id, path = %path.display(), "agent definition loaded");
        self.notify(LibraryEvent::Upserted(def));
    }

    /// Drop the definition backed by the given file.
    pub fn remove_path(&self, path: &Path) {
        let id = self
            .paths
            .write()
            .expect("paths lock poisoned")
            .remove(path);
        if let Some(id) = id {
            self.remove_id(&id);
        }
    }

    fn remove_id(&self, id: &str) {
        let removed = self
            .definitions
            .write()
            .expect("definitions lock poisoned")
            .remove(id);
        if removed.is_some() {
            self.selector.remove(id);
            tracing::debug!(agent = %id, "agent definition removed");
            self.notify(LibraryEvent::Removed(id.to_string()));
        }
    }

    /// Persist a definition as a file in the library directory.
    pub fn save_definition(&self, def: &AgentDefinition) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.toml", def.id));
        write_agent_file(def, &path)?;
        self.paths
            .write()
            .expect("paths lock poisoned")
            .insert(path.clone(), def.id.clone());
        self.definitions
            .write()
            .expect("definitions lock poisoned")
            .insert(def.id.clone(), def.clone());
        self.selector.upsert(def.id.clone(), def.descriptor());
        Ok(path)
    }

    pub fn get(&self, id: &str) -> Option<AgentDefinition> {
        self.definitions
            .read()
            .expect("definitions lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn list(&self) -> Vec<AgentDefinition> {
        let mut defs: Vec<AgentDefinition> = self
            .definitions
            .read()
            .expect("definitions lock poisoned")
            .values()
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    pub fn len(&self) -> usize {
        self.definitions
            .read()
            .expect("definitions lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start watching the directory for hot reload.
    pub fn watch(self: &Arc<Self>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let library = Arc::clone(self);
        let handle = watcher::spawn(
            &self.dir,
            Arc::new(move |path, change| match change {
                FileChange::Remove => library.remove_path(&path),
                FileChange::Upsert => library.upsert_from_file(&path),
            }),
        )?;
        *self.watcher.lock().expect("watcher lock poisoned") = Some(handle);
        Ok(())
    }

    /// Stop the watcher, if running.
    pub fn stop_watching(&self) {
        if let Some(handle) = self.watcher.lock().expect("watcher lock poisoned").take() {
            handle.stop();
        }
    }

    /// Top matches by descriptor similarity, joined with agent names.
    pub async fn find_top(&self, task: &str, n: usize) -> Result<Vec<SelectionMatch>> {
        let scored = self.selector.find_top(task, n).await?;
        let definitions = self.definitions.read().expect("definitions lock poisoned");
        Ok(scored
            .into_iter()
            .filter_map(|(id, similarity)| {
                definitions.get(&id).map(|def| SelectionMatch {
                    agent_id: id,
                    agent_name: def.name.clone(),
                    similarity,
                })
            })
            .collect())
    }

    /// The single best match, if any agent has an embedding.
    pub async fn find_best(&self, task: &str) -> Result<Option<SelectionMatch>> {
        Ok(self.find_top(task, 1).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedEmbedder;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    fn write_agent(dir: &Path, file: &str, id: &str, description: &str) {
        std::fs::write(
            dir.join(file),
            format!("id = \"{id}\"\ndescription = \"{description}\"\nsystem_prompt = \"go\"\n"),
        )
        .expect("agent file should be written");
    }

    #[tokio::test]
    async fn load_all_publishes_every_parsable_definition() {
        let dir = tempdir().expect("temp dir should be created");
        write_agent(dir.path(), "a.toml", "alpha", "first");
        write_agent(dir.path(), "b.toml", "bravo", "second");
        std::fs::write(dir.path().join("broken.toml"), "max_steps = 0\n").unwrap();

        let library = AgentLibrary::new(dir.path(), None);
        let loaded = library.load_all().expect("load should succeed");

        assert_eq!(loaded, 2);
        assert!(library.get("alpha").is_some());
        assert!(library.get("bravo").is_some());
    }

    #[tokio::test]
    async fn an_unparsable_rewrite_keeps_the_previous_definition() {
        let dir = tempdir().expect("temp dir should be created");
        write_agent(dir.path(), "a.toml", "alpha", "first");

        let library = AgentLibrary::new(dir.path(), None);
        library.load_all().unwrap();

        std::fs::write(dir.path().join("a.toml"), "max_steps = 0\n").unwrap();
        library.upsert_from_file(&dir.path().join("a.toml"));

        let kept = library.get("alpha").expect("definition should survive");
        assert_eq!(kept.description, "first");
    }

    #[tokio::test]
    async fn reload_all_prunes_definitions_whose_files_disappeared() {
        let dir = tempdir().expect("temp dir should be created");
        write_agent(dir.path(), "a.toml", "alpha", "first");
        write_agent(dir.path(), "b.toml", "bravo", "second");

        let library = AgentLibrary::new(dir.path(), None);
        library.load_all().unwrap();
        assert_eq!(library.len(), 2);

        std::fs::remove_file(dir.path().join("b.toml")).unwrap();
        let remaining = library.reload_all().expect("reload should succeed");

        assert_eq!(remaining, 1);
        assert!(library.get("bravo").is_none());
    }

    #[tokio::test]
    async fn listeners_observe_upserts_and_removals() {
        let dir = tempdir().expect("temp dir should be created");
        write_agent(dir.path(), "a.toml", "alpha", "first");

        let library = AgentLibrary::new(dir.path(), None);
        let events: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        library.set_listener(Arc::new(move |event| {
            let tag = match event {
                LibraryEvent::Upserted(def) => format!("up:{}", def.id),
                LibraryEvent::Removed(id) => format!("rm:{id}"),
            };
            sink.lock().unwrap().push(tag);
        }));

        library.load_all().unwrap();
        std::fs::remove_file(dir.path().join("a.toml")).unwrap();
        library.remove_path(&dir.path().join("a.toml"));

        let seen = events.lock().unwrap().clone();
        assert_eq!(seen, vec!["up:alpha".to_string(), "rm:alpha".to_string()]);
    }

    #[tokio::test]
    async fn a_file_that_changes_its_id_abandons_the_old_one() {
        let dir = tempdir().expect("temp dir should be created");
        write_agent(dir.path(), "a.toml", "alpha", "first");

        let library = AgentLibrary::new(dir.path(), None);
        library.load_all().unwrap();

        write_agent(dir.path(), "a.toml", "omega", "renamed");
        library.upsert_from_file(&dir.path().join("a.toml"));

        assert!(library.get("alpha").is_none());
        assert!(library.get("omega").is_some());
    }

    #[tokio::test]
    async fn selection_finds_the_closest_loaded_agent() {
        let dir = tempdir().expect("temp dir should be created");
        write_agent(dir.path(), "calc.toml", "calc-bot", "math arithmetic");
        write_agent(dir.path(), "writer.toml", "writer", "prose essays");

        let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder::new(
            vec![
                ("math".into(), vec![1.0, 0.0]),
                ("prose".into(), vec![0.0, 1.0]),
            ],
            vec![0.5, 0.5],
        ));
        let library = AgentLibrary::new(dir.path(), Some(embedder));
        library.load_all().unwrap();

        // Deterministic embeddings for the test instead of background tasks.
        for def in library.list() {
            library.selector().refresh(&def.id, &def.descriptor()).await;
        }

        let best = library
            .find_best("a math question")
            .await
            .unwrap()
            .expect("a best agent should exist");

        assert_eq!(best.agent_id, "calc-bot");
        assert!(best.similarity > 0.9);
    }

    #[tokio::test]
    async fn saving_a_definition_writes_a_loadable_file() {
        let dir = tempdir().expect("temp dir should be created");
        let library = AgentLibrary::new(dir.path(), None);
        library.load_all().unwrap();

        let def = AgentDefinition::new("saved", "Saved Agent");
        let path = library.save_definition(&def).expect("save should succeed");

        assert!(path.exists());
        let reloaded = AgentLibrary::new(dir.path(), None);
        reloaded.load_all().unwrap();
        assert!(reloaded.get("saved").is_some());
    }
}
