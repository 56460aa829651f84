//! Disk configuration: the text grammar the block manager uses to build
//! disks, and the programmatic config types behind it.

use crate::error::{Error, Result};

/// Which `FileBackend` implementation a disk uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Syscall,
    Mmap,
    Memory,
    LinuxAio,
    PosixAio,
    WinCall,
    FilePerBlock,
}

impl IoKind {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "syscall" => Ok(IoKind::Syscall),
            "mmap" => Ok(IoKind::Mmap),
            "memory" => Ok(IoKind::Memory),
            "linuxaio" => Ok(IoKind::LinuxAio),
            "aio" | "posixaio" => Ok(IoKind::PosixAio),
            "wincall" => Ok(IoKind::WinCall),
            "fileperblock" => Ok(IoKind::FilePerBlock),
            other => Err(Error::config(format!("unknown io kind '{other}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IoKind::Syscall => "syscall",
            IoKind::Mmap => "mmap",
            IoKind::Memory => "memory",
            IoKind::LinuxAio => "linuxaio",
            IoKind::PosixAio => "aio",
            IoKind::WinCall => "wincall",
            IoKind::FilePerBlock => "fileperblock",
        }
    }
}

bitflags::bitflags! {
    /// Disk-level flags recognized by the configuration line grammar.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiskFlags: u32 {
        const DIRECT          = 1 << 0;
        const AUTOGROW        = 1 << 1;
        const UNLINK_ON_OPEN  = 1 << 2;
        const DELETE_ON_EXIT  = 1 << 3;
        const RAW_DEVICE      = 1 << 4;
        /// Set by `direct=on` (as opposed to `direct=try`): failing to
        /// open with direct I/O is an error rather than a silent
        /// fallback to buffered I/O.
        const DIRECT_REQUIRED = 1 << 5;
    }
}

/// One disk declaration, as produced by parsing a configuration line or
/// built programmatically for tests.
#[derive(Debug, Clone)]
pub struct DiskConfig {
    pub path: String,
    /// Capacity in bytes; `0` means autogrow from empty.
    pub capacity: u64,
    pub io_kind: IoKind,
    pub flags: DiskFlags,
    /// Queue id override; `None` means "use the disk's index".
    pub queue_id: Option<i64>,
}

impl DiskConfig {
    pub fn new(path: impl Into<String>, capacity: u64, io_kind: IoKind) -> Self {
        DiskConfig {
            path: path.into(),
            capacity,
            io_kind,
            flags: DiskFlags::empty(),
            queue_id: None,
        }
    }

    pub fn autogrow(mut self) -> Self {
        self.flags |= DiskFlags::AUTOGROW;
        self
    }

    pub fn direct(mut self) -> Self {
        self.flags |= DiskFlags::DIRECT;
        self
    }

    /// Parse one configuration line:
    /// `disk=<path>,<size>,<io>[,direct=on|off|try][,unlink_on_open]`
    /// `[,delete_on_exit][,autogrow=on|off][,queue=<n>][,raw_device]`
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Err(Error::config("empty or comment line"));
        }
        let mut parts = line.split(',');
        let head = parts.next().ok_or_else(|| Error::config("empty line"))?;
        let (key, path) = head
            .split_once('=')
            .ok_or_else(|| Error::config(format!("expected 'disk=<path>', got '{head}'")))?;
        if key != "disk" {
            return Err(Error::config(format!("expected 'disk=', got '{key}='")));
        }

        let size_str = parts
            .next()
            .ok_or_else(|| Error::config("missing size field"))?;
        let capacity = parse_size(size_str)?;

        let io_str = parts
            .next()
            .ok_or_else(|| Error::config("missing io kind field"))?;
        let io_kind = IoKind::parse(io_str)?;

        let mut cfg = DiskConfig {
            path: path.to_string(),
            capacity,
            io_kind,
            flags: DiskFlags::empty(),
            queue_id: None,
        };

        for opt in parts {
            let opt = opt.trim();
            if opt.is_empty() {
                continue;
            }
            if let Some((k, v)) = opt.split_once('=') {
                match k {
                    "direct" => match v {
                        "on" => cfg.flags |= DiskFlags::DIRECT | DiskFlags::DIRECT_REQUIRED,
                        "try" => cfg.flags |= DiskFlags::DIRECT,
                        "off" => {}
                        other => return Err(Error::config(format!("bad direct= value '{other}'"))),
                    },
                    "autogrow" => match v {
                        "on" => cfg.flags |= DiskFlags::AUTOGROW,
                        "off" => {}
                        other => {
                            return Err(Error::config(format!("bad autogrow= value '{other}'")))
                        }
                    },
                    "queue" => {
                        let n: i64 = v
                            .parse()
                            .map_err(|_| Error::config(format!("bad queue= value '{v}'")))?;
                        cfg.queue_id = Some(n);
                    }
                    other => return Err(Error::config(format!("unknown option '{other}='"))),
                }
            } else {
                match opt {
                    "unlink_on_open" => cfg.flags |= DiskFlags::UNLINK_ON_OPEN,
                    "delete_on_exit" => cfg.flags |= DiskFlags::DELETE_ON_EXIT,
                    "raw_device" => cfg.flags |= DiskFlags::RAW_DEVICE,
                    "autogrow" => cfg.flags |= DiskFlags::AUTOGROW,
                    other => return Err(Error::config(format!("unknown option '{other}'"))),
                }
            }
        }

        if cfg.capacity == 0 && !cfg.flags.contains(DiskFlags::AUTOGROW) {
            cfg.flags |= DiskFlags::AUTOGROW;
        }

        Ok(cfg)
    }
}

/// Parse a byte size with an optional SI (k/M/G, powers of 1000) or IEC
/// (Ki/Mi/Gi, powers of 1024) suffix. `0` is accepted and means autogrow.
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let bad = || Error::config(format!("bad size '{s}'"));

    let (digits, mult): (&str, u64) = if let Some(p) = s.strip_suffix("GiB").or_else(|| s.strip_suffix("Gi")) {
        (p, 1 << 30)
    } else if let Some(p) = s.strip_suffix("MiB").or_else(|| s.strip_suffix("Mi")) {
        (p, 1 << 20)
    } else if let Some(p) = s.strip_suffix("KiB").or_else(|| s.strip_suffix("Ki")) {
        (p, 1 << 10)
    } else if let Some(p) = s.strip_suffix('G') {
        (p, 1_000_000_000)
    } else if let Some(p) = s.strip_suffix('M') {
        (p, 1_000_000)
    } else if let Some(p) = s.strip_suffix('K') {
        (p, 1_000)
    } else {
        (s, 1)
    };

    let base: u64 = digits.trim().parse().map_err(|_| bad())?;
    base.checked_mul(mult).ok_or_else(bad)
}

/// Open-mode flags for a file backend, OR-combinable.
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const CREAT          = 1 << 0;
        const RDONLY         = 1 << 1;
        const WRONLY         = 1 << 2;
        const RDWR           = 1 << 3;
        const DIRECT         = 1 << 4;
        const SYNC           = 1 << 5;
        const TRUNC          = 1 << 6;
        const REQUIRE_DIRECT = 1 << 7;
    }
}

/// Sentinel meaning "use the disk index as the queue id".
pub const DEFAULT_QUEUE: i64 = -1;
/// Sentinel meaning "this file has no block allocator".
pub const NO_ALLOCATOR: i64 = -1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_line() {
        let cfg = DiskConfig::parse_line("disk=/data/disk0,16Gi,syscall,direct=on").unwrap();
        assert_eq!(cfg.path, "/data/disk0");
        assert_eq!(cfg.capacity, 16 << 30);
        assert_eq!(cfg.io_kind, IoKind::Syscall);
        assert!(cfg.flags.contains(DiskFlags::DIRECT));
    }

    #[test]
    fn zero_size_means_autogrow() {
        let cfg = DiskConfig::parse_line("disk=/data/disk0,0,syscall").unwrap();
        assert!(cfg.flags.contains(DiskFlags::AUTOGROW));
    }

    #[test]
    fn si_and_iec_suffixes() {
        assert_eq!(parse_size("1K").unwrap(), 1_000);
        assert_eq!(parse_size("1Ki").unwrap(), 1_024);
        assert_eq!(parse_size("2M").unwrap(), 2_000_000);
        assert_eq!(parse_size("2Mi").unwrap(), 2 * (1 << 20));
        assert_eq!(parse_size("0").unwrap(), 0);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(DiskConfig::parse_line("bogus").is_err());
        assert!(DiskConfig::parse_line("disk=/x,abc,syscall").is_err());
        assert!(DiskConfig::parse_line("disk=/x,10,nonsense").is_err());
    }

    #[test]
    fn queue_and_raw_device_options() {
        let cfg =
            DiskConfig::parse_line("disk=/dev/sdb,0,syscall,raw_device,queue=3").unwrap();
        assert!(cfg.flags.contains(DiskFlags::RAW_DEVICE));
        assert_eq!(cfg.queue_id, Some(3));
    }
}
