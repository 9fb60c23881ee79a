pub mod history;
pub mod queue;
