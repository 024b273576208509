// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod grep;
pub mod list_dir;
pub mod read_file;
pub mod shell;
pub mod todo_write;
pub mod write;
