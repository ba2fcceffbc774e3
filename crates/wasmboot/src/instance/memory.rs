use crate::interpreter::Trap;

/// Size of a wasm page in bytes.
pub const PAGE_SIZE: usize = 65_536;

/// Upper bound on pages for a 32-bit memory (4 GiB).
const MAX_PAGES: u64 = 65_536;

/// A linear memory: a growable, bounds-checked byte buffer.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
    maximum: u64,
}

impl Memory {
    pub(crate) fn new(initial: u64, maximum: Option<u64>) -> Result<Self, Trap> {
        let maximum = maximum.unwrap_or(MAX_PAGES).min(MAX_PAGES);
        if initial > maximum {
            return Err(Trap::MemoryOutOfBounds);
        }
        let len = initial as usize * PAGE_SIZE;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| Trap::MemoryOutOfBounds)?;
        bytes.resize(len, 0);
        Ok(Self { bytes, maximum })
    }

    /// Current size in pages.
    pub fn pages(&self) -> u64 {
        (self.bytes.len() / PAGE_SIZE) as u64
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Grow by `delta` pages, returning the previous size, or `None` if the
    /// memory cannot grow that far.
    pub fn grow(&mut self, delta: u64) -> Option<u64> {
        let old = self.pages();
        let new = old.checked_add(delta)?;
        if new > self.maximum {
            return None;
        }
        let len = new as usize * PAGE_SIZE;
        self.bytes.try_reserve_exact(len - self.bytes.len()).ok()?;
        self.bytes.resize(len, 0);
        Some(old)
    }

    /// Borrow `len` bytes at `addr`.
    pub fn read(&self, addr: u64, len: usize) -> Result<&[u8], Trap> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, addr: u64, src: &[u8]) -> Result<(), Trap> {
        let range = self.range(addr, src.len())?;
        self.bytes[range].copy_from_slice(src);
        Ok(())
    }

    /// Read a UTF-8 string of `len` bytes at `addr`, replacing invalid
    /// sequences.
    pub fn read_string(&self, addr: u64, len: usize) -> Result<String, Trap> {
        Ok(String::from_utf8_lossy(self.read(addr, len)?).into_owned())
    }

    pub(crate) fn load<const N: usize>(&self, addr: u64) -> Result<[u8; N], Trap> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read(addr, N)?);
        Ok(buf)
    }

    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, Trap> {
        let start = usize::try_from(addr).map_err(|_| Trap::MemoryOutOfBounds)?;
        let end = start.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.bytes.len() {
            return Err(Trap::MemoryOutOfBounds);
        }
        Ok(start..end)
    }
}
