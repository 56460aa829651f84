use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::sync::Mutex;

use super::{FileBackend, OpType};
use crate::config::OpenFlags;
use crate::error::{Error, Result};

/// Syscall-based backend (`pread`/`pwrite` on Unix, positional read/write
/// on Windows). The default backend for real disks.
pub struct SyscallFile {
    file: Mutex<File>,
    path: Mutex<String>,
    queue_id: i64,
    allocator_id: i64,
    direct: bool,
}

impl fmt::Debug for SyscallFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyscallFile")
            .field("path", &*self.path.lock().unwrap())
            .field("queue_id", &self.queue_id)
            .finish()
    }
}

impl SyscallFile {
    pub fn open(
        path: &str,
        flags: OpenFlags,
        queue_id: i64,
        allocator_id: i64,
        initial_size: u64,
        unlink_on_open: bool,
    ) -> Result<Self> {
        let mut base_opts = OpenOptions::new();
        base_opts.read(true);
        if !flags.contains(OpenFlags::RDONLY) {
            base_opts.write(true);
        }
        if flags.contains(OpenFlags::CREAT) {
            base_opts.create(true);
        }
        if flags.contains(OpenFlags::TRUNC) {
            base_opts.truncate(true);
        }

        let (file, direct) = open_with_direct(&base_opts, path, flags)?;
        if initial_size > 0 {
            file.set_len(initial_size)?;
        }

        if unlink_on_open {
            // Leaves the fd valid; the inode is reclaimed only when the
            // last fd closes.
            let _ = fs::remove_file(path);
        }

        Ok(SyscallFile {
            file: Mutex::new(file),
            path: Mutex::new(path.to_string()),
            queue_id,
            allocator_id,
            direct,
        })
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }
}

/// Open `path` per `base_opts`, attempting `O_DIRECT` when
/// `flags` asks for it. `direct=on` (`OpenFlags::REQUIRE_DIRECT`) fails
/// the whole open if `O_DIRECT` is rejected by the kernel/filesystem;
/// `direct=try` (`OpenFlags::DIRECT` alone) falls back to a buffered
/// open. Returns the opened file and whether direct I/O is active.
#[cfg(unix)]
fn open_with_direct(base_opts: &OpenOptions, path: &str, flags: OpenFlags) -> Result<(File, bool)> {
    use std::os::unix::fs::OpenOptionsExt;

    if !flags.contains(OpenFlags::DIRECT) {
        return Ok((base_opts.open(path)?, false));
    }

    let mut direct_opts = base_opts.clone();
    direct_opts.custom_flags(libc::O_DIRECT);
    match direct_opts.open(path) {
        Ok(file) => Ok((file, true)),
        Err(e) if flags.contains(OpenFlags::REQUIRE_DIRECT) => Err(Error::io(format!(
            "opening '{path}' with O_DIRECT: {e}"
        ))),
        Err(_) => Ok((base_opts.open(path)?, false)),
    }
}

#[cfg(not(unix))]
fn open_with_direct(base_opts: &OpenOptions, path: &str, flags: OpenFlags) -> Result<(File, bool)> {
    if flags.contains(OpenFlags::REQUIRE_DIRECT) {
        return Err(Error::io("direct I/O is not supported on this platform"));
    }
    let _ = flags;
    Ok((base_opts.open(path)?, false))
}

#[cfg(unix)]
fn pread_all(file: &File, buf: &mut [u8], mut offset: u64) -> Result<()> {
    use std::os::unix::fs::FileExt;
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = file.read_at(&mut buf[filled..], offset)?;
        if n == 0 {
            return Err(Error::io("short read: unexpected end of file"));
        }
        filled += n;
        offset += n as u64;
    }
    Ok(())
}

#[cfg(unix)]
fn pwrite_all(file: &File, buf: &[u8], mut offset: u64) -> Result<()> {
    use std::os::unix::fs::FileExt;
    let mut written = 0usize;
    while written < buf.len() {
        let n = file.write_at(&buf[written..], offset)?;
        if n == 0 {
            return Err(Error::io("short write: zero bytes written"));
        }
        written += n;
        offset += n as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn pread_all(file: &File, buf: &mut [u8], mut offset: u64) -> Result<()> {
    use std::os::windows::fs::FileExt;
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = file.seek_read(&mut buf[filled..], offset)?;
        if n == 0 {
            return Err(Error::io("short read: unexpected end of file"));
        }
        filled += n;
        offset += n as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn pwrite_all(file: &File, buf: &[u8], mut offset: u64) -> Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0usize;
    while written < buf.len() {
        let n = file.seek_write(&buf[written..], offset)?;
        if n == 0 {
            return Err(Error::io("short write: zero bytes written"));
        }
        written += n;
        offset += n as u64;
    }
    Ok(())
}

impl FileBackend for SyscallFile {
    fn size(&self) -> u64 {
        self.file
            .lock()
            .unwrap()
            .metadata()
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn set_size(&self, bytes: u64) -> Result<()> {
        self.file.lock().unwrap().set_len(bytes)?;
        Ok(())
    }

    unsafe fn serve(&self, buffer: *mut u8, offset: u64, bytes: u64, op: OpType) -> Result<()> {
        let file = self.file.lock().unwrap();
        match op {
            OpType::Read => {
                let slice = std::slice::from_raw_parts_mut(buffer, bytes as usize);
                pread_all(&file, slice, offset)
            }
            OpType::Write => {
                let slice = std::slice::from_raw_parts(buffer, bytes as usize);
                pwrite_all(&file, slice, offset)
            }
        }
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().unwrap().sync_data()?;
        Ok(())
    }

    fn io_type(&self) -> &'static str {
        "syscall"
    }

    fn queue_id(&self) -> i64 {
        self.queue_id
    }

    fn allocator_id(&self) -> i64 {
        self.allocator_id
    }

    fn path(&self) -> String {
        self.path.lock().unwrap().clone()
    }

    fn rename(&self, new_path: &str) -> Result<()> {
        let mut path = self.path.lock().unwrap();
        fs::rename(&*path, new_path)?;
        *path = new_path.to_string();
        Ok(())
    }
}

impl Drop for SyscallFile {
    fn drop(&mut self) {
        // delete_on_exit handling lives in `Disk`'s destructor, which
        // knows the configured flags; this destructor only releases the
        // fd, matching the rest of the backends (none of them unlink
        // their own path on drop).
    }
}
