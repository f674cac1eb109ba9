//! Synchronization primitive tests (hosted port)

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use rtos::kernel::{os_sched_lock, os_sched_unlock};
use rtos::this_thread;
use rtos::{
    EventFlags, LockGuard, Mutex, OsError, Priority, Queue, Semaphore, SynchronizedIntegral,
    Thread, ThreadState,
};

const THREAD_STACK_SIZE: usize = 64 * 1024;

static SERIAL: StdMutex<()> = StdMutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    let _ = env_logger::builder().is_test(true).try_init();
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn thread(priority: Priority) -> Thread<'static> {
    Thread::with_stack_size(priority, THREAD_STACK_SIZE)
}

type Log = Arc<StdMutex<Vec<&'static str>>>;

fn log() -> Log {
    Arc::new(StdMutex::new(Vec::new()))
}

// ============ Semaphore ============

#[test]
fn semaphore_non_blocking_and_timeout() {
    let _serial = serial();
    let sem = Semaphore::new(0);

    assert_eq!(sem.try_acquire(), Err(OsError::PendWouldBlock));
    assert_eq!(sem.try_acquire_for(0), Err(OsError::PendWouldBlock));
    assert_eq!(sem.try_acquire_for(10), Err(OsError::Timeout));

    sem.release().unwrap();
    assert_eq!(sem.count(), 1);
    assert_eq!(sem.try_acquire_for(10), Ok(()));
    assert_eq!(sem.count(), 0);
}

#[test]
fn semaphore_overflow() {
    let _serial = serial();
    let sem = Semaphore::with_max(0, 1);
    sem.release().unwrap();
    assert_eq!(sem.release(), Err(OsError::SemOvf));
    assert_eq!(sem.count(), 1);
}

#[test]
fn semaphore_wakes_most_urgent_waiter() {
    let _serial = serial();
    let sem = Arc::new(Semaphore::new(0));
    let order = log();

    let mut low = thread(Priority::ABOVE_NORMAL);
    let mut high = thread(Priority::HIGH);

    let (s, o) = (sem.clone(), order.clone());
    low.start(move || {
        s.acquire().unwrap();
        o.lock().unwrap().push("low");
    })
    .unwrap();

    let (s, o) = (sem.clone(), order.clone());
    high.start(move || {
        s.acquire().unwrap();
        o.lock().unwrap().push("high");
    })
    .unwrap();

    assert_eq!(low.get_state(), ThreadState::WaitingSemaphore);
    assert_eq!(high.get_state(), ThreadState::WaitingSemaphore);

    sem.release().unwrap();
    sem.release().unwrap();
    low.join().unwrap();
    high.join().unwrap();

    assert_eq!(*order.lock().unwrap(), ["high", "low"]);
}

// ============ Mutex ============

#[test]
fn mutex_is_recursive_and_checks_owner() {
    let _serial = serial();
    let mutex = Mutex::new();

    assert!(!mutex.is_owned());
    assert_eq!(mutex.unlock(), Err(OsError::MutexNotOwner));

    mutex.lock().unwrap();
    mutex.lock().unwrap();
    assert_eq!(mutex.get_owner(), this_thread::get_id());

    mutex.unlock().unwrap();
    assert!(mutex.is_owned());
    mutex.unlock().unwrap();
    assert!(!mutex.is_owned());
    assert_eq!(mutex.get_owner(), None);
}

#[test]
fn mutex_contention_and_timeouts() {
    let _serial = serial();
    let mutex = Arc::new(Mutex::new());
    let seen = Arc::new(StdMutex::new(Vec::new()));
    mutex.lock().unwrap();

    let mut other = thread(Priority::ABOVE_NORMAL);
    let (m, s) = (mutex.clone(), seen.clone());
    other
        .start(move || {
            let results = [m.trylock(), m.trylock_for(10), m.unlock()];
            s.lock().unwrap().extend(results);
        })
        .unwrap();

    // the waiter timed out while this thread kept running
    other.join().unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        [
            Err(OsError::PendWouldBlock),
            Err(OsError::Timeout),
            Err(OsError::MutexNotOwner),
        ]
    );

    mutex.unlock().unwrap();
    assert_eq!(mutex.trylock(), Ok(()));
    mutex.unlock().unwrap();
}

#[test]
fn priority_inheritance_boosts_owner() {
    let _serial = serial();
    let mutex = Arc::new(Mutex::new());
    let locked = Arc::new(Semaphore::new(0));
    let go = Arc::new(Semaphore::new(0));
    let order = log();

    let mut owner = thread(Priority::LOW);
    let (m, l, g, o) = (mutex.clone(), locked.clone(), go.clone(), order.clone());
    owner
        .start(move || {
            m.lock().unwrap();
            l.release().unwrap();
            g.acquire().unwrap();
            m.unlock().unwrap();
            o.lock().unwrap().push("low");
        })
        .unwrap();

    // runs the owner until it holds the mutex
    locked.acquire().unwrap();
    assert_eq!(mutex.get_owner(), Some(owner.get_id()));

    let mut waiter = thread(Priority::HIGH);
    let (m, o) = (mutex.clone(), order.clone());
    waiter
        .start(move || {
            m.lock().unwrap();
            o.lock().unwrap().push("high");
            m.unlock().unwrap();
        })
        .unwrap();
    assert_eq!(waiter.get_state(), ThreadState::WaitingMutex);

    // the boosted owner preempts this thread as soon as it can run
    go.release().unwrap();
    order.lock().unwrap().push("main");

    owner.join().unwrap();
    waiter.join().unwrap();

    assert_eq!(*order.lock().unwrap(), ["high", "main", "low"]);
    assert_eq!(owner.get_priority(), Priority::LOW);
    assert!(!mutex.is_owned());
}

#[test]
fn inheritance_ends_when_waiter_times_out() {
    let _serial = serial();
    let mutex = Arc::new(Mutex::new());
    let locked = Arc::new(Semaphore::new(0));
    let go = Arc::new(Semaphore::new(0));
    let order = log();

    let mut owner = thread(Priority::LOW);
    let (m, l, g, o) = (mutex.clone(), locked.clone(), go.clone(), order.clone());
    owner
        .start(move || {
            m.lock().unwrap();
            l.release().unwrap();
            g.acquire().unwrap();
            o.lock().unwrap().push("low");
            m.unlock().unwrap();
        })
        .unwrap();
    locked.acquire().unwrap();

    let mut waiter = thread(Priority::HIGH);
    let m = mutex.clone();
    waiter
        .start(move || assert_eq!(m.trylock_for(10), Err(OsError::Timeout)))
        .unwrap();
    waiter.join().unwrap();

    // back at its own priority the owner no longer preempts this thread
    go.release().unwrap();
    order.lock().unwrap().push("main");
    owner.join().unwrap();

    assert_eq!(*order.lock().unwrap(), ["main", "low"]);
}

#[test]
fn terminated_owner_hands_mutex_to_waiter() {
    let _serial = serial();
    let mutex = Arc::new(Mutex::new());
    let never = Arc::new(Semaphore::new(0));

    let mut owner = thread(Priority::ABOVE_NORMAL);
    let (m, n) = (mutex.clone(), never.clone());
    owner
        .start(move || {
            m.lock().unwrap();
            n.acquire().unwrap();
        })
        .unwrap();
    assert_eq!(mutex.get_owner(), Some(owner.get_id()));

    let mut waiter = thread(Priority::ABOVE_NORMAL);
    let m = mutex.clone();
    waiter
        .start(move || {
            m.lock().unwrap();
            m.unlock().unwrap();
        })
        .unwrap();
    assert_eq!(waiter.get_state(), ThreadState::WaitingMutex);

    owner.terminate().unwrap();
    waiter.join().unwrap();
    owner.join().unwrap();

    assert!(!mutex.is_owned());
    assert_eq!(never.count(), 0);
}

#[test]
fn lock_guard_unlocks_on_every_exit() {
    let _serial = serial();
    let mutex = Mutex::new();

    {
        let _guard = mutex.lock_guard().unwrap();
        assert!(mutex.is_owned());
    }
    assert!(!mutex.is_owned());

    let early = |m: &Mutex, bail: bool| -> Result<(), OsError> {
        let _guard = LockGuard::new(m)?;
        if bail {
            return Err(OsError::Timeout);
        }
        Ok(())
    };
    assert_eq!(early(&mutex, true), Err(OsError::Timeout));
    assert!(!mutex.is_owned());
    assert_eq!(early(&mutex, false), Ok(()));
    assert!(!mutex.is_owned());

    let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
        let _guard = mutex.lock_guard().unwrap();
        panic!("unwinding with the lock held");
    }));
    assert!(unwound.is_err());
    assert!(!mutex.is_owned());
}

// ============ Event flags ============

#[test]
fn event_flags_set_clear_get() {
    let _serial = serial();
    let flags = EventFlags::new();

    assert_eq!(flags.set(0x1), Ok(0x1));
    assert_eq!(flags.set(0x4), Ok(0x5));
    assert_eq!(flags.get(), 0x5);
    assert_eq!(flags.clear(0x1), Ok(0x5));
    assert_eq!(flags.get(), 0x4);

    assert_eq!(flags.wait_all_for(0x6, 0, false), Err(OsError::PendWouldBlock));
    assert_eq!(flags.wait_any_for(0x6, 10, false), Ok(0x4));
    assert_eq!(flags.get(), 0x4);
    assert_eq!(flags.wait_all_for(0x4, 10, true), Ok(0x4));
    assert_eq!(flags.get(), 0);

    assert_eq!(flags.wait_any_for(0x1, 10, true), Err(OsError::Timeout));
    assert_eq!(flags.wait_any(0, true), Err(OsError::FlagPendOpt));
}

#[test]
fn event_flags_consumed_by_first_waiter() {
    let _serial = serial();
    let flags = Arc::new(EventFlags::new());

    let mut first = thread(Priority::ABOVE_NORMAL);
    let mut second = thread(Priority::ABOVE_NORMAL);
    let f = flags.clone();
    first.start(move || assert_eq!(f.wait_any(0x1, true), Ok(0x1))).unwrap();
    let f = flags.clone();
    second.start(move || assert_eq!(f.wait_any(0x1, true), Ok(0x1))).unwrap();

    flags.set(0x1).unwrap();
    assert_eq!(first.get_state(), ThreadState::Deleted);
    assert_eq!(second.get_state(), ThreadState::WaitingEventFlag);
    assert_eq!(flags.get(), 0);

    flags.set(0x1).unwrap();
    first.join().unwrap();
    second.join().unwrap();
    assert_eq!(flags.get(), 0);
}

#[test]
fn event_flags_wake_every_satisfied_waiter() {
    let _serial = serial();
    let flags = Arc::new(EventFlags::new());
    let order = log();

    let mut any = thread(Priority::ABOVE_NORMAL);
    let mut all = thread(Priority::ABOVE_NORMAL);
    let (f, o) = (flags.clone(), order.clone());
    any.start(move || {
        f.wait_any(0x3, false).unwrap();
        o.lock().unwrap().push("any");
    })
    .unwrap();
    let (f, o) = (flags.clone(), order.clone());
    all.start(move || {
        f.wait_all(0x3, false).unwrap();
        o.lock().unwrap().push("all");
    })
    .unwrap();

    flags.set(0x1).unwrap();
    assert_eq!(all.get_state(), ThreadState::WaitingEventFlag);
    flags.set(0x2).unwrap();

    any.join().unwrap();
    all.join().unwrap();
    assert_eq!(*order.lock().unwrap(), ["any", "all"]);
    assert_eq!(flags.get(), 0x3);
}

// ============ Queue ============

#[test]
fn queue_is_fifo_and_bounded() {
    let _serial = serial();
    let queue: Queue<u32, 3> = Queue::new();
    assert_eq!(queue.capacity(), 3);
    assert!(queue.is_empty());

    for v in 1..=3 {
        queue.put(v).unwrap();
    }
    assert!(queue.is_full());

    let rejected = queue.try_put(4).unwrap_err();
    assert_eq!(rejected.error, OsError::QFull);
    assert_eq!(rejected.into_inner(), 4);

    let timed_out = queue.try_put_for(5, 10).unwrap_err();
    assert_eq!((timed_out.value, timed_out.error), (5, OsError::Timeout));

    assert_eq!(queue.get(), Ok(1));
    assert_eq!(queue.try_get(), Ok(2));
    assert_eq!(queue.try_get_for(10), Ok(3));

    assert_eq!(queue.try_get(), Err(OsError::QEmpty));
    assert_eq!(queue.try_get_for(10), Err(OsError::Timeout));
    assert_eq!(queue.count(), 0);
}

#[test]
fn queue_keeps_order_across_blocking_hand_off() {
    let _serial = serial();
    let queue: Arc<Queue<u32, 2>> = Arc::new(Queue::new());
    let received = Arc::new(StdMutex::new(Vec::new()));

    let mut consumer = thread(Priority::LOW);
    let (q, r) = (queue.clone(), received.clone());
    consumer
        .start(move || {
            for _ in 0..10 {
                let value = q.get().unwrap();
                r.lock().unwrap().push(value);
            }
        })
        .unwrap();

    // blocks in put whenever the queue is full
    for v in 0..10 {
        queue.put(v).unwrap();
    }
    consumer.join().unwrap();

    assert_eq!(*received.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[test]
fn queue_hands_values_to_waiting_getter() {
    let _serial = serial();
    let queue: Arc<Queue<String, 1>> = Arc::new(Queue::new());
    let received = Arc::new(StdMutex::new(Vec::new()));

    let mut consumer = thread(Priority::HIGH);
    let (q, r) = (queue.clone(), received.clone());
    consumer
        .start(move || {
            for _ in 0..3 {
                r.lock().unwrap().push(q.get().unwrap());
            }
        })
        .unwrap();

    for word in ["alpha", "beta", "gamma"] {
        assert_eq!(consumer.get_state(), ThreadState::WaitingMessageGet);
        queue.put(word.to_string()).unwrap();
    }
    consumer.join().unwrap();

    assert_eq!(*received.lock().unwrap(), ["alpha", "beta", "gamma"]);
    assert!(queue.is_empty());
}

// ============ Integral ============

#[test]
fn synchronized_integral_operations() {
    let _serial = serial();
    let value = SynchronizedIntegral::new(10i32);

    assert_eq!(value.increment(), Ok(11));
    assert_eq!(value.decrement(), Ok(10));
    assert_eq!(value.fetch_add(5), Ok(10));
    assert_eq!(value.fetch_sub(20), Ok(15));
    assert_eq!(value.load(), Ok(-5));
    value.store(7).unwrap();
    assert_eq!(value.load(), Ok(7));
    assert!(!value.internal_mutex().is_owned());
}

// ============ Scheduler lock ============

#[test]
fn sched_lock_defers_preemption() {
    let _serial = serial();
    let order = log();

    let mut high = thread(Priority::HIGH);

    os_sched_lock().unwrap();
    let o = order.clone();
    high.start(move || o.lock().unwrap().push("high")).unwrap();
    order.lock().unwrap().push("locked");
    assert_eq!(high.get_state(), ThreadState::Ready);

    // blocking calls are refused while locked
    assert_eq!(this_thread::sleep_for(1), Err(OsError::SchedLocked));
    assert_eq!(Semaphore::new(0).try_acquire_for(5), Err(OsError::SchedLocked));

    os_sched_unlock().unwrap();
    order.lock().unwrap().push("unlocked");
    high.join().unwrap();

    assert_eq!(*order.lock().unwrap(), ["locked", "high", "unlocked"]);
    assert_eq!(os_sched_unlock(), Err(OsError::SchedNotLocked));
}

#[test]
fn time_advances() {
    let _serial = serial();
    let t0 = rtos::time::os_time_get_us();
    let ticks0 = rtos::time::os_time_get();
    this_thread::sleep_for(20).unwrap();
    assert!(rtos::time::os_time_get_us() - t0 >= 20_000);
    assert!(rtos::time::os_time_get() - ticks0 >= 20);
    assert!(rtos::time::os_time_get_ms() >= 20);
}
