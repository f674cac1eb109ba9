//! Priority inversion bounded by mutex priority inheritance
//!
//! Low holds the mutex, High waits for it, Medium wants the CPU. While High
//! waits, Low runs at High's priority, so Medium cannot starve it.
//!
//! Runs on the hosted port: `cargo run --example priority_inversion`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use rtos::{this_thread, Mutex, OsResult, Priority, Thread, CFG_STK_SIZE_DEFAULT};

static STOP: AtomicBool = AtomicBool::new(false);

/// Run a thread body, reporting the kernel error that cut it short
fn run(name: &str, body: impl FnOnce() -> OsResult<()>) {
    if let Err(err) = body() {
        warn!("[{}] stopped: {:?}", name, err);
    }
}

fn main() -> OsResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Priority Inversion Demo: H(HIGH) M(NORMAL) L(LOW)");

    let mutex = Arc::new(Mutex::new());

    let mut low = Thread::with_name(Priority::LOW, CFG_STK_SIZE_DEFAULT, "L");
    let mut med = Thread::with_name(Priority::ABOVE_NORMAL, CFG_STK_SIZE_DEFAULT, "M");
    let mut high = Thread::with_name(Priority::HIGH, CFG_STK_SIZE_DEFAULT, "H");

    let m = mutex.clone();
    low.start(move || {
        run("LOW", || {
            for n in 1..=3 {
                let guard = m.lock_guard()?;
                info!("[LOW] holding #{}", n);
                // long critical section, yielding to the kernel on each step
                for _ in 0..5 {
                    this_thread::yield_now()?;
                    std::thread::sleep(std::time::Duration::from_millis(2));
                }
                drop(guard);
                this_thread::sleep_for(30)?;
            }
            Ok(())
        })
    })?;

    med.start(|| {
        run("MED", || {
            while !STOP.load(Ordering::Relaxed) {
                std::thread::sleep(std::time::Duration::from_millis(1));
                this_thread::sleep_for(5)?;
            }
            Ok(())
        })
    })?;

    let m = mutex.clone();
    high.start(move || {
        run("HIGH", || {
            this_thread::sleep_for(5)?;
            for n in 1..=3 {
                let start = rtos::time::os_time_get_ms();
                let guard = m.lock_guard()?;
                info!("[HIGH] acquired #{} after {} ms", n, rtos::time::os_time_get_ms() - start);
                drop(guard);
                this_thread::sleep_for(30)?;
            }
            Ok(())
        })
    })?;

    high.join()?;
    low.join()?;
    STOP.store(true, Ordering::Relaxed);
    med.join()?;

    info!("done");
    Ok(())
}
