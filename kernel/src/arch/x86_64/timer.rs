//! Legacy PIC + PIT timer
//!
//! Remaps the PIC pair to vectors 32..48, programs PIT channel 0 for the
//! configured tick rate, and unmasks only the timer line. IRQ lines used
//! by external drivers are unmasked on demand through the IRQ waiter
//! registry.

use spin::Mutex;

use crate::config::TIMER_HZ;

/// Base vectors after remap.
pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// PIT input clock in Hz.
const PIT_BASE_HZ: u64 = 1_193_182;

#[cfg(target_os = "none")]
static PICS: Mutex<pic8259::ChainedPics> =
    // SAFETY: the offsets avoid the CPU exception vectors.
    Mutex::new(unsafe { pic8259::ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[cfg(not(target_os = "none"))]
static PICS: Mutex<()> = Mutex::new(());

/// Remap the PICs, program the PIT, and unmask the timer line. Interrupts
/// remain disabled; the idle loop enables them once the scheduler runs.
pub fn init() {
    #[cfg(target_os = "none")]
    {
        // SAFETY: standard PIC initialization sequence on the standard
        // ports, executed once with interrupts disabled.
        unsafe {
            let mut pics = PICS.lock();
            pics.initialize();
            // Mask everything except the timer (line 0) and the cascade
            // (line 2).
            pics.write_masks(!0b0000_0101, 0xFF);
        }

        let divisor = (PIT_BASE_HZ / TIMER_HZ) as u16;
        // SAFETY: PIT mode/command and channel-0 data ports; rate
        // generator mode 2, lobyte/hibyte access.
        unsafe {
            use x86_64::instructions::port::Port;
            let mut command: Port<u8> = Port::new(0x43);
            let mut channel0: Port<u8> = Port::new(0x40);
            command.write(0b0011_0100u8);
            channel0.write((divisor & 0xFF) as u8);
            channel0.write((divisor >> 8) as u8);
        }
    }

    log::info!("timer: PIT at {} Hz", TIMER_HZ);
}

/// Acknowledge an IRQ at the PIC.
pub fn end_of_interrupt(vector: u8) {
    #[cfg(target_os = "none")]
    // SAFETY: vector is one of our remapped IRQ vectors.
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
    #[cfg(not(target_os = "none"))]
    let _ = vector;
}

/// Unmask an IRQ line for a driver that registered an IRQ waiter.
pub fn unmask_irq(line: u8) {
    #[cfg(target_os = "none")]
    {
        let mut pics = PICS.lock();
        // SAFETY: reading and rewriting the PIC mask registers.
        unsafe {
            let [mask1, mask2] = pics.read_masks();
            if line < 8 {
                pics.write_masks(mask1 & !(1 << line), mask2);
            } else {
                // Cascade line 2 must stay open for the secondary PIC.
                pics.write_masks(mask1 & !(1 << 2), mask2 & !(1 << (line - 8)));
            }
        }
    }
    #[cfg(not(target_os = "none"))]
    let _ = line;
}
