//! Built-in operations for the perfh harness and the registry that looks them
//! up by name.

mod error;
mod noop;
mod registry;
mod sleep;
mod tcp;

pub use error::{Error, Result, TcpError};
pub use noop::{NoopFactory, NoopOperation};
pub use registry::{FactoryFn, create_factory, names, registry};
pub use sleep::{SleepFactory, SleepOperation};
pub use tcp::{TcpRequestor, TcpRequestorConfig, TcpRequestorFactory};
