//! Producer-consumer over a bounded queue
//!
//! Runs on the hosted port: `cargo run --example producer_consumer`.

use std::sync::Arc;

use log::{info, warn};
use rtos::{this_thread, OsResult, Priority, Queue, Semaphore, Thread, CFG_STK_SIZE_DEFAULT};

const ITEMS: u32 = 20;

fn main() -> OsResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Producer-Consumer Demo");

    let queue: Arc<Queue<u32, 4>> = Arc::new(Queue::new());
    let done = Arc::new(Semaphore::new(0));

    let mut producer = Thread::with_name(Priority::NORMAL, CFG_STK_SIZE_DEFAULT, "producer");
    let mut consumer = Thread::with_name(Priority::ABOVE_NORMAL, CFG_STK_SIZE_DEFAULT, "consumer");

    let q = queue.clone();
    producer.start(move || {
        for n in 1..=ITEMS {
            if q.put(n).is_err() {
                return;
            }
            info!("[P] produced #{}", n);
            if n % 5 == 0 {
                if let Err(err) = this_thread::sleep_for(20) {
                    warn!("[P] pause failed: {:?}", err);
                }
            }
        }
    })?;

    let (q, d) = (queue.clone(), done.clone());
    consumer.start(move || {
        let mut sum = 0;
        while let Ok(n) = q.get() {
            sum += n;
            info!("[C] consumed #{} (sum {})", n, sum);
            if n == ITEMS {
                break;
            }
        }
        if let Err(err) = d.release() {
            warn!("[C] cannot signal completion: {:?}", err);
        }
    })?;

    done.acquire()?;
    producer.join()?;
    consumer.join()?;

    info!(
        "done; producer stack used {} of {} bytes",
        producer.max_stack(),
        producer.stack_size()
    );
    Ok(())
}
