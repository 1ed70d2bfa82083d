//! One module per `keyward` subcommand.

pub mod add;
pub mod audit_cmd;
pub mod completions;
pub mod delete;
pub mod edit;
pub mod history;
pub mod init;
pub mod list;
pub mod request;
pub mod requests;
pub mod reveal;
pub mod review;
pub mod rotation_due;
pub mod search;
pub mod share;
pub mod show;
