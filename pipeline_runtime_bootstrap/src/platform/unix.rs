// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Unix Platform Implementation
//!
//! POSIX implementation via `libc` and `/proc`-free system calls, usable on
//! both Linux and macOS.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Platform, PlatformError};

pub struct UnixPlatform;

impl UnixPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UnixPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for UnixPlatform {
    fn page_size(&self) -> usize {
        // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions and never fails
        // on a conforming libc; a negative return (error) falls back to 4096.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    }

    fn cpu_count(&self) -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }

    fn total_memory(&self) -> Result<u64, PlatformError> {
        // SAFETY: _SC_PHYS_PAGES and _SC_PAGESIZE are read-only queries.
        let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
        if pages < 0 {
            return Err(PlatformError::Other("sysconf(_SC_PHYS_PAGES) failed".to_string()));
        }
        Ok(pages as u64 * self.page_size() as u64)
    }

    fn available_memory(&self) -> Result<u64, PlatformError> {
        // SAFETY: _SC_AVPHYS_PAGES is a read-only query.
        let pages = unsafe { libc::sysconf(libc::_SC_AVPHYS_PAGES) };
        if pages < 0 {
            return Err(PlatformError::Other("sysconf(_SC_AVPHYS_PAGES) failed".to_string()));
        }
        Ok(pages as u64 * self.page_size() as u64)
    }

    fn line_separator(&self) -> &'static str {
        "\n"
    }

    fn path_separator(&self) -> char {
        ':'
    }

    fn platform_name(&self) -> &'static str {
        if cfg!(target_os = "macos") {
            "macos"
        } else {
            "linux"
        }
    }

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }

    fn is_elevated(&self) -> bool {
        // SAFETY: geteuid takes no arguments and always succeeds.
        unsafe { libc::geteuid() == 0 }
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), PlatformError> {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(PlatformError::Io)
    }

    fn is_executable(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|meta| meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    async fn sync_file(&self, file: &tokio::fs::File) -> Result<(), PlatformError> {
        file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_platform_basics() {
        let platform = UnixPlatform::new();
        assert!(platform.cpu_count() >= 1);
        let page_size = platform.page_size();
        assert!(page_size >= 512);
        assert!(page_size <= 65536);
    }

    #[test]
    fn test_unix_platform_constants() {
        let platform = UnixPlatform::new();
        assert_eq!(platform.line_separator(), "\n");
        assert_eq!(platform.path_separator(), ':');
    }

    #[test]
    fn test_temp_dir() {
        let platform = UnixPlatform::new();
        assert!(!platform.temp_dir().as_os_str().is_empty());
    }
}
