pub mod config_watcher;
