pub mod config_watcher;
pub mod file_system;
pub mod git;
pub mod http_client;
pub mod http_handler;
pub mod middleware;
pub mod shell_runtime;

/// Re-export commonly used types from adapters
pub use config_watcher::ConfigWatcher;
pub use file_system::FileSystemAdapter;
pub use git::GitCli;
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use shell_runtime::ShellRuntime;
