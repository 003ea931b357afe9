// ABOUTME: Library module for sql-utils
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod commands;
pub mod compare;
pub mod config;
pub mod dbms;
pub mod error;
pub mod template;
pub mod utils;
