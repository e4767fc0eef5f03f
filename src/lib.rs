pub mod config;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod models;
pub mod payments;
pub mod signer;
pub mod store;
pub mod submitter;

pub use config::Config;
pub use driver::{Driver, TickOutcome, TickStats};
pub use error::{PayoutError, Result};
pub use models::{Amount, Payment, PaymentState};
pub use payments::PaymentService;
