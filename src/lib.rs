// Library entrypoint for integration tests and internal reuse.
mod api;
mod core;
mod services;
pub mod storage;

pub use api::{build_router, panic_guard};
pub use core::{config, i18n, schemas, shutdown, state};
pub use services::behavior;
