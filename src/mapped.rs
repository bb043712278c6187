//! Scope-owned memory mapping (DESIGN NOTES, "Scoped resources").
//!
//! Both input files and the output image are mapped through this wrapper
//! so that every exit path, including a fatal error unwinding through
//! `anyhow::Result`, releases the mapping via `Drop` rather than relying on
//! an explicit close call some error path might skip.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use anyhow::Context as _;
use memmap2::{Mmap, MmapMut};

/// A read-only mapping of an input file (object, archive, or script text).
pub struct MappedFile {
    _file: File,
    mmap: Mmap,
}

impl MappedFile {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        // SAFETY: the file is not concurrently truncated by this process;
        // external modification during the link is an accepted race the
        // teacher's own plain `std::fs::read` would share.
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {}", path.display()))?;
        Ok(MappedFile { _file: file, mmap })
    }
}

impl Deref for MappedFile {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.mmap
    }
}

/// A writable mapping of the output file, sized up front once the writer
/// knows the final image length (§4.11).
pub struct MappedOutput {
    file: File,
    mmap: MmapMut,
}

impl MappedOutput {
    pub fn create(path: &Path, len: u64) -> anyhow::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("creating {}", path.display()))?;
        file.set_len(len).with_context(|| format!("sizing {}", path.display()))?;
        let mmap = unsafe { MmapMut::map_mut(&file) }.with_context(|| format!("mapping {}", path.display()))?;
        Ok(MappedOutput { file, mmap })
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.mmap.flush().context("flushing output mapping")?;
        Ok(())
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}
