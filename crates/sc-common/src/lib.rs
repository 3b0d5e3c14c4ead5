pub mod error;
pub mod events;

pub use error::AppError;
pub use events::EventBus;
