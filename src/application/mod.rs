pub mod engine;
pub mod scheduler;

pub use engine::{EngineDeps, EngineError, TickReport, VenueEngine};
pub use scheduler::{ShutdownHandle, TickScheduler, WorkerSummary};
