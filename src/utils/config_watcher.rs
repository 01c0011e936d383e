//! Hot reload of the configuration file.
//!
//! Every change to the file is loaded, validated and compiled into a fresh
//! [`ProxyService`]. Only a generation that passes all of that replaces the
//! running one; anything else is logged and the previous generation stays.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::loader::{apply_env_overrides, load_config};
use crate::config::{ConfigValidator, ServerConfig};
use crate::core::{DecoyPage, ProxyService};

/// Editors often write a file in several steps; wait for the burst to end.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Validates `config` and compiles it, decoy page included.
pub async fn compile_generation(config: &ServerConfig) -> Result<ProxyService> {
    ConfigValidator::validate(config)?;
    let decoy_path = config.rejection.decoy_page.as_deref().map(Path::new);
    let decoy = DecoyPage::load(decoy_path)
        .await
        .with_context(|| format!("Failed to read decoy page {:?}", decoy_path))?;
    Ok(ProxyService::new(config, decoy)?)
}

/// Re-reads `path` (plus environment overrides) and swaps the result into
/// `holder`. The holder is untouched on any error.
pub async fn reload(path: &Path, holder: &RwLock<Arc<ProxyService>>) -> Result<()> {
    let mut config = load_config(path).await?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    let service = Arc::new(compile_generation(&config).await?);

    match holder.write() {
        Ok(mut guard) => *guard = service,
        Err(poisoned) => *poisoned.into_inner() = service,
    }
    Ok(())
}

/// Keeps the file watcher and its reload task alive.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn spawn(config_path: PathBuf, holder: Arc<RwLock<Arc<ProxyService>>>) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let file_name = config_path.file_name().map(|name| name.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if is_relevant(&event, file_name.as_deref()) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "Config watcher error"),
            }
        })?;

        // Watch the directory so editors that replace the file are still seen.
        let watch_dir = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", watch_dir.display()))?;
        tracing::info!(path = %config_path.display(), "Watching configuration for changes");

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                tokio::time::sleep(DEBOUNCE).await;
                while rx.try_recv().is_ok() {}

                match reload(&config_path, &holder).await {
                    Ok(()) => tracing::info!(path = %config_path.display(), "Configuration reloaded"),
                    Err(err) => tracing::error!(
                        path = %config_path.display(),
                        error = %format!("{err:#}"),
                        "Configuration reload rejected, keeping previous configuration"
                    ),
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn is_relevant(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event.paths.iter().any(|path| path.file_name() == file_name)
}
