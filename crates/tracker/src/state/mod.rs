mod groups;
mod users;

pub use groups::{FileEntry, Group, Groups};
pub use users::Users;
