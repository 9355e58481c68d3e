pub mod date;
pub mod link;
pub mod task;
pub mod text;
