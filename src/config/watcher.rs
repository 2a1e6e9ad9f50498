//! Configuration hot reload
//!
//! Watches the configuration location and, after a short debounce, rebuilds
//! the provider snapshot from the new configuration. A configuration that
//! fails to load or validate leaves the running snapshot in place.

use super::{Config, ConfigOverrides};
use crate::error::Result;
use crate::providers::ProviderRegistry;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEBOUNCE_DURATION: Duration = Duration::from_millis(100);

/// Load and validate configuration for a reload
pub fn reload_config(location: &Path, overrides: &ConfigOverrides) -> Result<Config> {
    let mut config = Config::from_location(location)?;
    config.apply_environment_overrides()?;
    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

/// Spawn the watcher task; it runs until the event channel closes
pub fn spawn_config_watcher(
    location: PathBuf,
    overrides: ConfigOverrides,
    providers: Arc<ProviderRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_watch_loop(location, overrides, providers).await;
    })
}

async fn run_watch_loop(location: PathBuf, overrides: ConfigOverrides, providers: Arc<ProviderRegistry>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(e) = tx.send(event) {
                    error!("Failed to send file system event: {}", e);
                }
            }
            Err(e) => error!("File system watch error: {}", e),
        },
        notify::Config::default(),
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("Failed to create file watcher for hot-reload: {}", e);
            return;
        }
    };

    // A single file is watched through its parent so editors that replace the file still trigger
    let (watch_path, mode) = if location.is_dir() {
        (location.clone(), RecursiveMode::Recursive)
    } else {
        let parent = location
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        (parent, RecursiveMode::NonRecursive)
    };

    if let Err(e) = watcher.watch(&watch_path, mode) {
        error!("Failed to watch {} for hot-reload: {}", watch_path.display(), e);
        return;
    }
    info!("Hot-reload watching {}", location.display());

    let mut debounce_timer: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if is_relevant(&location, &event) {
                            debug!("Configuration change detected: {:?}", event.paths);
                            debounce_timer = Some(tokio::time::Instant::now() + DEBOUNCE_DURATION);
                        }
                    }
                    None => {
                        warn!("Hot-reload file system event channel closed");
                        break;
                    }
                }
            }

            _ = tokio::time::sleep(Duration::from_millis(50)), if debounce_timer.is_some() => {
                if debounce_timer.is_some_and(|timer| tokio::time::Instant::now() >= timer) {
                    debounce_timer = None;
                    apply_reload(&location, &overrides, &providers);
                }
            }
        }
    }
}

fn apply_reload(location: &Path, overrides: &ConfigOverrides, providers: &ProviderRegistry) {
    info!("Reloading configuration from {}", location.display());
    let config = match reload_config(location, overrides) {
        Ok(config) => config,
        Err(e) => {
            error!("Hot-reload rejected, keeping current providers: {}", e);
            return;
        }
    };

    match providers.reload(&config.llm) {
        Ok(()) => info!("Hot-reload completed (active provider: {})", config.llm.active),
        Err(e) => error!("Hot-reload rejected, keeping current providers: {}", e),
    }
}

/// Create/modify/remove of a configuration file under the watched location
fn is_relevant(location: &Path, event: &Event) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }

    event.paths.iter().any(|path| {
        let is_config_file = path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                ext == "json" || ext == "yaml" || ext == "yml"
            })
            .unwrap_or(false);
        if !is_config_file {
            return false;
        }

        if location.is_dir() {
            path.starts_with(location) || canonical(path).starts_with(canonical(location))
        } else {
            path.file_name() == location.file_name()
        }
    })
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};
    use tempfile::TempDir;

    #[test]
    fn test_only_config_files_are_relevant() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().to_path_buf();

        let json = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(location.join("llm.json"));
        assert!(is_relevant(&location, &json));

        let swap = Event::new(EventKind::Create(CreateKind::File)).add_path(location.join(".llm.json.swp"));
        assert!(!is_relevant(&location, &swap));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path(location.join("llm.json"));
        assert!(!is_relevant(&location, &access));
    }

    #[test]
    fn test_invalid_reload_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("server.json"), r#"{"port": 0}"#).unwrap();
        assert!(reload_config(dir.path(), &ConfigOverrides::default()).is_err());
    }
}
