use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Summary of a kernel image that parsed as an ELF executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfSummary {
    pub entry_point: u64,
    pub machine: u16,
    /// Sum of the file sizes of all PT_LOAD segments.
    pub loadable_bytes: u64,
}

/// What we know about an artifact on disk before handing it to the emulator.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub size_bytes: u64,
    /// None when the file is not a parsable ELF (a raw binary image, say).
    pub elf: Option<ElfSummary>,
}

/// Inspect a kernel image. Fails only on I/O; an unparsable ELF is a
/// warning, since the emulator is the final authority on what it can load.
pub fn inspect(path: &Path) -> io::Result<ImageInfo> {
    let buffer = fs::read(path)?;
    let size_bytes = buffer.len() as u64;

    let elf = match Elf::parse(&buffer) {
        Ok(elf) => {
            let loadable_bytes: u64 = elf
                .program_headers
                .iter()
                .filter(|ph| ph.p_type == PT_LOAD)
                .map(|ph| ph.p_filesz)
                .sum();

            if elf.header.e_machine != goblin::elf::header::EM_ARM {
                warn!(
                    "Kernel image {:?} is not an ARM ELF (e_machine = {})",
                    path, elf.header.e_machine
                );
            }
            if loadable_bytes == 0 {
                warn!("No loadable segments found in {:?}", path);
            }
            debug!(
                "ELF entry point {:#x}, {} loadable bytes",
                elf.entry, loadable_bytes
            );

            Some(ElfSummary {
                entry_point: elf.entry,
                machine: elf.header.e_machine,
                loadable_bytes,
            })
        }
        Err(err) => {
            warn!("Kernel image {:?} is not a parsable ELF: {}", path, err);
            None
        }
    };

    Ok(ImageInfo { size_bytes, elf })
}

/// Hex-encoded SHA-256 of the image contents, for run reports.
pub fn sha256_hex(path: &Path) -> io::Result<String> {
    let buffer = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&buffer);
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push("ignition-image-tests");
        let _ = fs::create_dir_all(&dir);
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        dir.join(format!("{name}-{nonce}"))
    }

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Minimal 32-bit little-endian ARM ELF with one PT_LOAD segment of
    /// four bytes. 52-byte ELF header + 32-byte program header + payload.
    fn minimal_arm_elf() -> Vec<u8> {
        let mut buf = Vec::new();

        // e_ident
        buf.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf.push(1); // EI_CLASS: ELFCLASS32
        buf.push(1); // EI_DATA: little endian
        buf.push(1); // EI_VERSION
        buf.extend_from_slice(&[0; 9]); // OS ABI + padding

        push_u16(&mut buf, 2); // e_type: ET_EXEC
        push_u16(&mut buf, 40); // e_machine: EM_ARM
        push_u32(&mut buf, 1); // e_version
        push_u32(&mut buf, 0x101); // e_entry (thumb bit set)
        push_u32(&mut buf, 52); // e_phoff
        push_u32(&mut buf, 0); // e_shoff
        push_u32(&mut buf, 0); // e_flags
        push_u16(&mut buf, 52); // e_ehsize
        push_u16(&mut buf, 32); // e_phentsize
        push_u16(&mut buf, 1); // e_phnum
        push_u16(&mut buf, 0); // e_shentsize
        push_u16(&mut buf, 0); // e_shnum
        push_u16(&mut buf, 0); // e_shstrndx

        // Program header
        push_u32(&mut buf, 1); // p_type: PT_LOAD
        push_u32(&mut buf, 84); // p_offset
        push_u32(&mut buf, 0x100); // p_vaddr
        push_u32(&mut buf, 0x100); // p_paddr
        push_u32(&mut buf, 4); // p_filesz
        push_u32(&mut buf, 4); // p_memsz
        push_u32(&mut buf, 5); // p_flags: R+X
        push_u32(&mut buf, 4); // p_align

        buf.extend_from_slice(&[0xfe, 0xe7, 0x00, 0xbf]); // b . ; nop

        buf
    }

    #[test]
    fn test_inspect_arm_elf() {
        let path = temp_path("kernel.elf");
        fs::write(&path, minimal_arm_elf()).unwrap();

        let info = inspect(&path).unwrap();
        assert_eq!(info.size_bytes, 88);
        let elf = info.elf.expect("should parse as ELF");
        assert_eq!(elf.entry_point, 0x101);
        assert_eq!(elf.machine, goblin::elf::header::EM_ARM);
        assert_eq!(elf.loadable_bytes, 4);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_inspect_raw_binary() {
        let path = temp_path("kernel.bin");
        fs::write(&path, b"not an elf at all").unwrap();

        let info = inspect(&path).unwrap();
        assert_eq!(info.size_bytes, 17);
        assert!(info.elf.is_none());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_inspect_missing_file() {
        let path = temp_path("does-not-exist");
        let err = inspect(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_sha256_hex() {
        let path = temp_path("digest");
        fs::write(&path, b"hello").unwrap();

        assert_eq!(
            sha256_hex(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        let _ = fs::remove_file(&path);
    }
}
