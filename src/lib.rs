// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

pub mod callbacks;
pub mod classify;
pub mod controller;
pub mod error;
pub mod graph;
pub mod path_guard;
pub mod retry;
pub mod segmenter;
pub mod settings;
pub mod watchdog;
