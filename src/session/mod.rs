mod deck;
mod groups;
mod instance;
mod storage;

pub use deck::{Deck, NewInstance};
pub use groups::GroupTree;
pub use instance::{Binding, Instance, Tool};
pub use storage::{expand_tilde, Storage};
