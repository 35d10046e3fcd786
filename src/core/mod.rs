pub mod traits;
pub mod types;

pub use traits::Clock;
pub use traits::Delivery;
pub use traits::Handler;
pub use traits::Store;
pub use types::Envelope;
pub use types::HandlerError;
pub use types::HandlerOutcome;
pub use types::HandlerPolicy;
pub use types::ResultCode;
