// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage backends.

mod log_file;
mod memory;
mod redb_store;
mod sealed_fs;
mod sled_store;

pub use log_file::LogFileProvider;
pub use memory::MemoryProvider;
pub use redb_store::RedbProvider;
pub use sealed_fs::SealedFsProvider;
pub use sled_store::SledProvider;
