//! Cerrojo Ticket - ticket selling demo
//!
//! Several sale windows sell one shared ticket stock. Each window runs its own
//! store session and mutex; the stock is only touched while the lock is held.

pub mod cli;
pub mod logging;
pub mod office;
pub mod seller;

pub use cli::Cli;
pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use office::TicketOffice;
pub use seller::{SalePlan, SaleSummary, WindowReport, run};
