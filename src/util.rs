use std::fs::File;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;

use crate::error::Result;

// BLKGETSIZE64, _IOR(0x12, 114, size_t)
const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;

/// Byte length of an open file. Regular files report their metadata length,
/// block devices are queried through the `BLKGETSIZE64` ioctl.
pub(crate) fn file_size(file: &File) -> Result<u64> {
    let meta = file.metadata()?;
    if !meta.file_type().is_block_device() {
        return Ok(meta.len());
    }

    let mut size: u64 = 0;
    let res = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut size) };
    if res != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(size)
}

pub(crate) fn round_up(n: u64, multiple: u64) -> u64 {
    (n + multiple - 1) / multiple * multiple
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 8), 0);
        assert_eq!(round_up(1, 8), 8);
        assert_eq!(round_up(8, 8), 8);
        assert_eq!(round_up(9, 8), 16);
        assert_eq!(round_up(132096, 4096), 135168);
    }

    #[test]
    fn test_file_size_regular_file() {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(&[0u8; 12345]).unwrap();
        assert_eq!(file_size(&f).unwrap(), 12345);
    }
}
