pub mod init;
pub mod notify;
pub mod query;
pub mod run;
