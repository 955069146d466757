//! Host providers: the OS side of convergence
//!
//! One provider per resource kind, all shelling out through [`crate::runner`].

mod exec;
mod file;
mod package;
mod service;

pub use exec::ExecProvider;
pub use file::FileProvider;
pub use package::PackageProvider;
pub use service::ServiceProvider;

use declarative::Providers;

use crate::config::EngineConfig;

/// Providers for a Debian host with SysV-style service control
pub fn host(engine: &EngineConfig) -> Providers {
    let retry = engine.retry();
    Providers::new(
        ExecProvider,
        FileProvider::new(retry.clone(), engine.timeout()),
        PackageProvider::new(retry),
        ServiceProvider::new(),
    )
}
