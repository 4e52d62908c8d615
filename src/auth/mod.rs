//! Identity: signed bearer tokens and the configured user table.

mod token;
mod users;

pub use token::{Claims, Identity, TokenMinter, extract_bearer, roles_match};
pub use users::UserTable;
