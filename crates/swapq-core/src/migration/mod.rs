//! Migration - 旧形式（単一 blob）から現行形式（タスク毎レコード）への移行

pub mod legacy;
mod runner;

pub use runner::{InitContext, MigrationLatch, MigrationRunner};
