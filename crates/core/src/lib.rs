//! Core library for retiming subtitle files.
//!
//! The pieces, bottom up: [`timestamp`] reads and writes time stamps,
//! [`tweak`] shifts and scales them, [`chop`] tracks records and drops the
//! unwanted ones, [`encoding`] gets bytes in and out as UTF-8, and
//! [`retime`] ties them together for one document.

pub mod chop;
pub mod config;
pub mod encoding;
pub mod error;
pub mod retime;
pub mod timestamp;
pub mod tweak;

pub use config::RetimeConfig;
pub use error::{Result, SyncError};
pub use retime::{retime, retime_with, RetimeReport};
