pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{AppConfig, ConfigHandle};
pub use error::{AxiomError, Result, ValidationError};
pub use traits::{IdentityTransmit, Scorer, StepHandler, Transmit};
pub use types::*;
