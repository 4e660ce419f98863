#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

pub mod backoff;
pub mod config;
pub mod discovery;
pub mod events;
pub mod http;
pub mod pipeline;
pub mod poller;
pub mod registry;
pub mod repository;
pub mod runner;
pub mod scheduler;
pub mod summary;

pub use backoff::{BackoffController, BackoffSettings, RetryDelay};
pub use config::{AgentConfig, ConfigError, ConfigFile, ConfigOverrides, Credential};
pub use discovery::{discover, DirectoryWalker, Discovery, DiscoveryError, WalkdirWalker};
pub use events::{decode_events, first_trigger, Event, EventKind};
pub use http::{HttpClient, HttpRequest, HttpResponse, OctocrabClient, TransportError};
pub use pipeline::{
    CommandOutcome, CommandRunner, CommandSpec, PipelineError, PipelineReport, PipelineSettings,
    Stage, TokioCommandRunner, UpdatePipeline,
};
pub use poller::{EventPoller, PollFailure, PollResult};
pub use registry::{RefreshReport, RegistryError, RepoRegistry};
pub use repository::{MonitoredRepository, ParseError, RepoKey};
pub use runner::{LiveScheduler, Runner, RunnerError};
pub use scheduler::Scheduler;
pub use summary::{CycleSummary, RepoOutcome};
