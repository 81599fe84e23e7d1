pub mod events;
pub mod file;
pub mod ids;
pub mod item;
pub mod priority;

pub use events::UploadEvent;
pub use file::{mime_from_name, RawFile};
pub use ids::ItemId;
pub use item::{UploadItem, UploadState};
pub use priority::UploadPriority;
