pub mod credentials;
pub mod directory;
pub mod executor;
pub mod oci;
pub mod supervisor;

pub use credentials::{OciConfigFile, OciConfigSource};
pub use directory::{DirectoryError, DirectoryService, ImageSummary, OciDirectory};
pub use executor::{OciExecutor, RealExecutor};
pub use supervisor::{CommandSupervisor, LaunchError, ProcessOutcome, ProcessSupervisor};
