//! # procward
//!
//! Single-host process supervision engine.
//!
//! Launch shell commands detached from the caller, keep a durable JSON record
//! per process, restart crashed processes from a periodic monitor, and capture
//! output into size-rotated log files that can be tailed or followed.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use procward::{Config, Monitor, Paths, Supervisor};
//!
//! # #[tokio::main]
//! # async fn main() -> procward::Result<()> {
//! let sup = Supervisor::new(Paths::new("/tmp/procward"), Config::default());
//!
//! let record = sup.start(Some("web"), "python3 -m http.server 8000", true, false).await?;
//! println!("{} running as pid {:?}", record.name, record.pid());
//!
//! // One reconciliation pass; `Monitor::run` loops on an interval.
//! let monitor = Monitor::new(sup);
//! monitor.tick().await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod logs;
pub mod monitor;
pub mod output;
pub mod paths;
pub mod pidfile;
pub mod record;
pub mod registry;
pub mod supervisor;
pub mod usage;

pub use config::{load_config, Config};
pub use error::{Error, Result};
pub use monitor::{Monitor, TickOutcome, TickReport};
pub use paths::Paths;
pub use record::{ProcessRecord, ProcessState, Status};
pub use registry::Registry;
pub use supervisor::{BatchReport, Op, ProcessView, Supervisor, Target};
