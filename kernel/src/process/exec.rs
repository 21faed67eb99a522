//! Program loading and exec
//!
//! A minimal static ELF64 loader: validates the identity, walks PT_LOAD
//! segments into anonymous VMAs, copies file bytes, and reports the entry
//! point and program break. Dynamic linking, interpreters, and relocation
//! belong to the external loader; exec needs no more than this.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::{
    arch::context::TrapFrame,
    config,
    error::{FsError, KernelError, KernelResult},
    mm::{
        vas::{AddressSpace, VmaFlags},
        PAGE_SIZE,
    },
    sched,
};

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 0x3E;
const PT_LOAD: u32 = 1;

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

/// Result of loading an image into an address space.
pub struct LoadedImage {
    pub entry: u64,
    /// First page past the highest segment; the heap VMA grows from here.
    pub brk: u64,
}

fn read_u16(image: &[u8], off: usize) -> KernelResult<u16> {
    let b = image
        .get(off..off + 2)
        .ok_or(KernelError::InvalidArgument)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(image: &[u8], off: usize) -> KernelResult<u32> {
    let b = image
        .get(off..off + 4)
        .ok_or(KernelError::InvalidArgument)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64(image: &[u8], off: usize) -> KernelResult<u64> {
    let b = image
        .get(off..off + 8)
        .ok_or(KernelError::InvalidArgument)?;
    Ok(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

/// Reject anything but a little-endian static x86-64 ELF64 executable.
fn validate_header(image: &[u8]) -> KernelResult<()> {
    if image.len() < 64 || image[..4] != ELF_MAGIC {
        return Err(KernelError::InvalidArgument);
    }
    if image[4] != ELFCLASS64 || image[5] != ELFDATA2LSB {
        return Err(KernelError::InvalidArgument);
    }
    if read_u16(image, 16)? != ET_EXEC || read_u16(image, 18)? != EM_X86_64 {
        return Err(KernelError::InvalidArgument);
    }
    Ok(())
}

/// Load a static ELF64 executable into `space`.
pub fn load_image(space: &mut AddressSpace, image: &[u8]) -> KernelResult<LoadedImage> {
    validate_header(image)?;

    let entry = read_u64(image, 24)?;
    let phoff = read_u64(image, 32)? as usize;
    let phentsize = read_u16(image, 54)? as usize;
    let phnum = read_u16(image, 56)? as usize;
    if phentsize < 56 || phnum == 0 || phnum > 64 {
        return Err(KernelError::InvalidArgument);
    }

    let mut brk = 0u64;
    for i in 0..phnum {
        let ph = phoff + i * phentsize;
        if read_u32(image, ph)? != PT_LOAD {
            continue;
        }
        let p_flags = read_u32(image, ph + 4)?;
        let p_offset = read_u64(image, ph + 8)? as usize;
        let p_vaddr = read_u64(image, ph + 16)?;
        let p_filesz = read_u64(image, ph + 32)? as usize;
        let p_memsz = read_u64(image, ph + 40)? as usize;

        if p_memsz == 0 {
            continue;
        }
        if p_vaddr < config::USER_SPACE_BASE
            || p_vaddr + p_memsz as u64 >= config::USER_SPACE_END
            || p_offset + p_filesz > image.len()
        {
            return Err(KernelError::InvalidArgument);
        }

        let seg_start = p_vaddr & !(PAGE_SIZE as u64 - 1);
        let seg_end = (p_vaddr + p_memsz as u64 + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);

        let mut flags = VmaFlags::USER;
        if p_flags & PF_R != 0 {
            flags |= VmaFlags::READ;
        }
        if p_flags & PF_W != 0 {
            flags |= VmaFlags::WRITE;
        }
        if p_flags & PF_X != 0 {
            flags |= VmaFlags::EXEC;
        }

        space
            .vmas
            .insert(crate::mm::Vma {
                start: seg_start,
                end: seg_end,
                // The copy below writes through the kernel window, so a
                // read/exec-only segment stays that way for user code.
                flags,
                kind: crate::mm::VmaKind::Anonymous,
            })
            .map_err(KernelError::Map)?;

        super::creation::write_to_space(space, p_vaddr, &image[p_offset..p_offset + p_filesz])?;
        brk = brk.max(seg_end);
    }

    if brk == 0 {
        return Err(KernelError::InvalidArgument);
    }
    Ok(LoadedImage { entry, brk })
}

/// Read a whole file out of the VFS (exec's image fetch).
pub fn read_file(path: &str) -> KernelResult<Vec<u8>> {
    let node = crate::kctx::vfs().resolve(path).map_err(KernelError::Fs)?;
    if node.node_type() != crate::fs::NodeType::File {
        return Err(KernelError::Fs(FsError::IsADirectory));
    }
    let len = node.len() as usize;
    let mut data = vec![0u8; len];
    let mut done = 0;
    while done < len {
        let n = node
            .read(done as u64, &mut data[done..])
            .map_err(KernelError::Fs)?;
        if n == 0 {
            break;
        }
        done += n;
    }
    data.truncate(done);
    Ok(data)
}

/// Replace the current task's address space with a fresh image and reset
/// its saved user frame to the new entry point.
pub fn exec_current(
    frame: &mut TrapFrame,
    path: &str,
    argv: &[String],
    envp: &[String],
) -> KernelResult<()> {
    let image = read_file(path)?;

    let mut space = AddressSpace::new_user().map_err(KernelError::Map)?;
    let loaded = load_image(&mut space, &image)?;

    let stack_base = config::USER_STACK_TOP - config::USER_STACK_SIZE as u64;
    space
        .map_anonymous(
            stack_base,
            config::USER_STACK_SIZE as u64,
            VmaFlags::READ | VmaFlags::WRITE,
        )
        .map_err(KernelError::Map)?;

    let argv_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
    let envp_refs: Vec<&str> = envp.iter().map(String::as_str).collect();
    let sp = super::creation::build_entry_stack(&mut space, &argv_refs, &envp_refs, loaded.entry)?;

    space.brk_start = loaded.brk;
    space.brk_end = loaded.brk;

    let task = sched::current_task();

    // Point of no return: install the new space, then tear down the old
    // one. The kernel keeps running on its shared upper half throughout.
    let new_ref = Arc::new(spin::Mutex::new(space));
    new_ref.lock().switch_to();
    let old = task.space.lock().replace(new_ref);
    if let Some(old_ref) = old {
        if let Ok(mutex) = Arc::try_unwrap(old_ref) {
            mutex.into_inner().destroy();
        }
    }

    task.signals.lock().reset_for_exec();
    task.fds.lock().close_cloexec();

    *frame = TrapFrame::new_user(loaded.entry, sp);
    log::debug!("task {} exec {} entry {:#x}", task.id, path, loaded.entry);
    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_elf_images() {
        let mut bad_magic = [0u8; 64];
        bad_magic[..4].copy_from_slice(b"\x7fELG");
        assert!(validate_header(&bad_magic).is_err());
        assert!(validate_header(&[0u8; 8]).is_err());
    }

    #[test]
    fn rejects_wrong_class_or_machine() {
        let mut image = wellformed();
        image[4] = 1; // 32-bit class
        assert!(validate_header(&image).is_err());

        let mut image = wellformed();
        image[18..20].copy_from_slice(&0xB7u16.to_le_bytes()); // aarch64
        assert!(validate_header(&image).is_err());
    }

    #[test]
    fn accepts_a_wellformed_header() {
        assert!(validate_header(&wellformed()).is_ok());
    }

    fn wellformed() -> [u8; 64] {
        let mut image = [0u8; 64];
        image[..4].copy_from_slice(&ELF_MAGIC);
        image[4] = ELFCLASS64;
        image[5] = ELFDATA2LSB;
        image[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        image[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        image
    }
}
