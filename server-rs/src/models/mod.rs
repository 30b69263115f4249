pub mod activity;
pub mod challenge;
pub mod notification;
pub mod progress;
pub mod reward;
pub mod social;
pub mod taxonomy;
pub mod user;

pub use activity::*;
pub use challenge::*;
pub use notification::*;
pub use progress::*;
pub use reward::*;
pub use social::*;
pub use taxonomy::*;
pub use user::*;
