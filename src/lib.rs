//! Serve one directory tree over plain HTTP verbs: GET reads a file or
//! lists a directory, PUT creates or replaces a file, DELETE removes.

pub mod sys_config;
pub mod sys_core;
pub mod sys_fileapi;
pub mod sys_pathguard;
