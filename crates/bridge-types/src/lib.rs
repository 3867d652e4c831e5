pub mod account;
pub mod backoff;
pub mod errors;
pub mod events;
pub mod intent;
pub mod quote;
pub mod signature;
pub mod transaction;

pub use account::*;
pub use backoff::*;
pub use errors::*;
pub use events::*;
pub use intent::*;
pub use quote::*;
pub use signature::*;
pub use transaction::*;
