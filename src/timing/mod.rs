mod notes;
mod scheduler;

pub use notes::{Note, NoteId};
pub use scheduler::{NoteSink, NoteTriggerScheduler};
