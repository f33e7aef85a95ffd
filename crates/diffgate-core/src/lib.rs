pub mod config;
pub mod detectors;
pub mod diff;
pub mod error;
pub mod github;
pub mod languages;
pub mod notify;
pub mod protection;
pub mod scan;
pub mod scheduler;
pub mod secrets;
pub mod webhook;

pub use config::GateConfig;
pub use detectors::{Detection, Detector, FileContext, Severity};
pub use error::GateError;
pub use github::GithubClient;
pub use scan::{ChangedFile, ScanOutcome, Scanner};
pub use scheduler::{ScanMode, Scheduler};
pub use secrets::{FileStore, MemoryStore, SecretStore};
pub use webhook::{WebhookReply, WebhookService};
