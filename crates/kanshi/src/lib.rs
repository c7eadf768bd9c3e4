//! # kanshi
//!
//! Child-process supervisor with non-blocking, line-oriented output capture.
//!
//! A [`Supervisor`] launches one external program at a time, tails its
//! stdout and stderr from background tasks, and hands complete lines to a
//! polling caller (a render loop, a terminal printer) without ever blocking
//! it. On top of that sit two independent pieces of policy: a
//! [`LineClassifier`] that labels output lines, and a [`ConnectionPolicy`]
//! that turns supervisor events into user-facing connection state.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kanshi::{Supervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sup = Supervisor::new(SupervisorConfig::default());
//! sup.start("ping", ["-c", "3", "1.1.1.1"], "").await.unwrap();
//!
//! while sup.is_running() || !sup.is_settled() {
//!     print!("{}", sup.consume_new_output());
//!     tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//! }
//! print!("{}", sup.consume_new_output());
//! sup.stop(true).await;
//! # }
//! ```

pub mod backend;
pub mod classify;
pub mod cmdline;
pub mod config;
pub mod decode;
pub mod error;
pub mod framing;
pub mod output;
pub mod progress;
pub mod supervisor;
pub mod types;

pub use backend::{Backend, ChildProcess, LaunchSpec, Spawned, TokioBackend};
pub use classify::{Classification, LineClassifier, PatternClassifier, PatternSet};
pub use config::SupervisorConfig;
pub use error::{ClassifierError, LaunchError};
pub use output::OutputBuffer;
pub use progress::{ConnState, ConnectionPolicy, PolicyConfig, Transition, TransitionReason};
pub use supervisor::Supervisor;
pub use types::*;
