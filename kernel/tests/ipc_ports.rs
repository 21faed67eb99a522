//! In-kernel IPC integration: port lifecycle, FIFO and full-queue
//! behavior, the name registry, and shared-memory refcounting.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(not(target_os = "none"))]
fn main() {}

#[cfg(target_os = "none")]
mod bare {
    extern crate alloc;

    use bootloader_api::{config::Mapping, entry_point, BootInfo, BootloaderConfig};
    use tephra_kernel::{
        config::IPC_PORT_QUEUE_SIZE,
        error::IpcError,
        ipc::{Message, ShmemFlags, IPC_NONBLOCK},
        kctx, test_framework, Testable,
    };

    pub static BOOTLOADER_CONFIG: BootloaderConfig = {
        let mut config = BootloaderConfig::new_default();
        config.mappings.physical_memory = Some(Mapping::Dynamic);
        config
    };

    entry_point!(test_main, config = &BOOTLOADER_CONFIG);

    fn test_main(boot_info: &'static mut BootInfo) -> ! {
        tephra_kernel::bootstrap::early_init(boot_info);

        let tests: &[&dyn Testable] = &[
            &send_recv_roundtrip,
            &queue_full_then_drain,
            &registry_rendezvous,
            &shmem_lifecycle,
            &shmem_fork_inheritance,
        ];
        test_framework::test_runner(tests);
        tephra_kernel::arch::halt()
    }

    /// The idle/boot task owns the ports it creates here, so
    /// non-blocking receives run in-context.
    fn me() -> u64 {
        tephra_kernel::sched::current_tid()
    }

    fn send_recv_roundtrip() {
        let ports = kctx::ports();
        let port = ports.create(me(), 0).expect("port slot free");

        let msg = Message::new(b"ping", 0).expect("payload fits");
        ports
            .send(port, msg, me(), IPC_NONBLOCK, 0)
            .expect("ring has space");

        let got = ports
            .recv(port, me(), IPC_NONBLOCK, 0)
            .expect("message queued");
        assert_eq!(got.payload(), b"ping");
        assert_eq!(got.sender, me());
        assert!(got.msg_id > 0);

        ports.destroy(port, me()).expect("owner destroys");
    }

    fn queue_full_then_drain() {
        let ports = kctx::ports();
        let port = ports.create(me(), 0).expect("port slot free");

        for i in 0..IPC_PORT_QUEUE_SIZE {
            let msg = Message::new(&[i as u8], 0).expect("fits");
            ports
                .send(port, msg, me(), IPC_NONBLOCK, 0)
                .expect("ring below capacity");
        }
        let overflow = Message::new(b"x", 0).expect("fits");
        assert_eq!(
            ports.send(port, overflow, me(), IPC_NONBLOCK, 0),
            Err(IpcError::QueueFull)
        );

        // One receive must re-admit exactly one send, in FIFO order.
        let first = ports.recv(port, me(), IPC_NONBLOCK, 0).expect("queued");
        assert_eq!(first.payload(), &[0]);
        ports
            .send(port, overflow, me(), IPC_NONBLOCK, 0)
            .expect("space after drain");

        ports.destroy(port, me()).expect("owner destroys");
    }

    fn registry_rendezvous() {
        let ports = kctx::ports();
        let names = kctx::port_names();
        let port = ports.create(me(), 0).expect("port slot free");

        names.register(port, "svc.echo").expect("name free");
        assert_eq!(names.lookup("svc.echo").expect("bound"), port);

        let other = ports.create(me(), 0).expect("port slot free");
        assert_eq!(
            names.register(other, "svc.echo"),
            Err(IpcError::NameUnavailable)
        );

        ports.destroy(port, me()).expect("owner destroys");
        assert_eq!(names.lookup("svc.echo"), Err(IpcError::NameUnavailable));
        ports.destroy(other, me()).expect("owner destroys");
    }

    /// Forking with a mapped region must register the child in the
    /// region's mapped set: the refcount counts both tasks and each can
    /// unmap independently.
    fn shmem_fork_inheritance() {
        use alloc::sync::Arc;
        use tephra_kernel::mm::vas::AddressSpace;

        let shmem = kctx::shmem();
        let frames_before = kctx::frames().free_count();

        let region = shmem
            .create(2 * 4096, me(), ShmemFlags::READ | ShmemFlags::WRITE)
            .expect("region slot free");

        let parent_space = Arc::new(spin::Mutex::new(
            AddressSpace::new_user().expect("user space allocates"),
        ));
        let base = shmem
            .map(region, me(), &parent_space)
            .expect("maps into parent");
        assert!(base >= tephra_kernel::config::MMAP_REGION_BASE);
        assert_eq!(shmem.refcount(region).expect("region live"), 1);

        // Fork the mapper: clone the space copy-on-write, then register
        // the child in the region table exactly as the fork path does.
        let child_id = me() + 1000;
        let child_space = parent_space.lock().clone_cow().expect("cow clone");
        shmem.inherit_mappings(&child_space, child_id);
        assert_eq!(shmem.refcount(region).expect("region live"), 2);

        // Each side releases its mapping independently.
        let child_space = Arc::new(spin::Mutex::new(child_space));
        shmem
            .unmap(region, child_id, &child_space)
            .expect("child unmaps its inherited mapping");
        assert_eq!(shmem.refcount(region).expect("region live"), 1);
        shmem
            .unmap(region, me(), &parent_space)
            .expect("parent unmaps");
        assert_eq!(shmem.refcount(region).expect("region live"), 0);

        shmem.destroy(region, me()).expect("owner destroys");
        assert!(shmem.refcount(region).is_err());

        // Space teardown returns the page-table frames, the destroy
        // returned the region's, so the frame balance closes.
        Arc::try_unwrap(parent_space)
            .ok()
            .expect("sole reference")
            .into_inner()
            .destroy();
        Arc::try_unwrap(child_space)
            .ok()
            .expect("sole reference")
            .into_inner()
            .destroy();
        assert_eq!(kctx::frames().free_count(), frames_before);
    }

    fn shmem_lifecycle() {
        let shmem = kctx::shmem();
        let frames_before = kctx::frames().free_count();

        let region = shmem
            .create(3 * 4096 + 1, me(), ShmemFlags::READ | ShmemFlags::WRITE)
            .expect("region slot free");
        // ceil(size / 4096) frames
        assert_eq!(kctx::frames().free_count(), frames_before - 4);
        assert_eq!(shmem.refcount(region).expect("region live"), 0);

        shmem.destroy(region, me()).expect("owner destroys");
        assert_eq!(kctx::frames().free_count(), frames_before);
        assert!(shmem.refcount(region).is_err());
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        test_framework::test_panic_handler(info)
    }
}
