//! Unit tests for core RTOS modules
//!
//! These tests run on the host and check the pieces that need no running
//! kernel: the priority bitmap, error codes, types and configuration.

#[cfg(test)]
mod prio_tests {
    use rtos::config::CFG_PRIO_MAX;
    use rtos::prio::PrioTable;

    #[test]
    fn test_empty_table() {
        let table = PrioTable::new();
        assert!(table.is_empty());
        assert_eq!(table.get_highest(), (CFG_PRIO_MAX - 1) as u8);
    }

    #[test]
    fn test_single_priority() {
        let mut table = PrioTable::new();

        table.insert(5);
        assert!(!table.is_empty());
        assert!(table.is_set(5));
        assert!(!table.is_set(4));
        assert_eq!(table.get_highest(), 5);

        table.remove(5);
        assert!(table.is_empty());
    }

    #[test]
    fn test_out_of_order_inserts() {
        let mut table = PrioTable::new();

        for prio in [39, 8, 62, 24, 31] {
            table.insert(prio);
        }

        for expected in [8, 24, 31, 39, 62] {
            assert_eq!(table.get_highest(), expected);
            table.remove(expected);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_word_boundaries() {
        let mut table = PrioTable::new();

        table.insert(31);
        table.insert(32);
        assert_eq!(table.get_highest(), 31);

        table.remove(31);
        assert_eq!(table.get_highest(), 32);

        table.insert(63);
        table.remove(32);
        assert_eq!(table.get_highest(), 63);
    }

    #[test]
    fn test_all_priorities() {
        let mut table = PrioTable::new();
        for i in 0..CFG_PRIO_MAX {
            table.insert(i as u8);
        }

        for i in 0..CFG_PRIO_MAX {
            assert_eq!(table.get_highest(), i as u8);
            table.remove(i as u8);
        }
        assert!(table.is_empty());
    }
}

#[cfg(test)]
mod error_tests {
    use rtos::error::{OsError, OsResult};

    #[test]
    fn test_error_codes() {
        assert_eq!(OsError::Timeout.code(), 29401);
        assert_eq!(OsError::MutexNotOwner.code(), 22401);
        assert_eq!(OsError::PendWouldBlock.code(), 25008);
        assert_ne!(OsError::QFull, OsError::QEmpty);
    }

    #[test]
    fn test_errors_propagate() {
        fn inner() -> OsResult<u32> {
            Err(OsError::SemOvf)
        }
        fn outer() -> OsResult<u32> {
            let value = inner()?;
            Ok(value + 1)
        }

        assert_eq!(outer(), Err(OsError::SemOvf));
        assert!(!format!("{:?}", OsError::StkOvf).is_empty());
    }
}

#[cfg(test)]
mod types_tests {
    use rtos::types::*;
    use rtos::{Priority, ThreadState};

    #[test]
    fn test_option_flags() {
        use rtos::types::opt::*;

        assert_eq!(NONE, 0);
        assert_eq!(PEND_BLOCKING, 0);
        assert_eq!(PEND_NON_BLOCKING, 0x8000);

        let combined = FLAG_WAIT_ALL | FLAG_NO_CLEAR | PEND_NON_BLOCKING;
        assert_ne!(combined & FLAG_WAIT_ALL, 0);
        assert_ne!(combined & FLAG_NO_CLEAR, 0);
        assert_eq!(FLAG_WAIT_ANY & FLAG_WAIT_ALL, 0);
    }

    #[test]
    fn test_wait_forever() {
        assert_eq!(OS_WAIT_FOREVER, u32::MAX);
    }

    #[test]
    fn test_priority_ordering() {
        let levels = [
            Priority::IDLE,
            Priority::LOW,
            Priority::BELOW_NORMAL,
            Priority::NORMAL,
            Priority::ABOVE_NORMAL,
            Priority::HIGH,
            Priority::REALTIME,
            Priority::MAX,
        ];
        assert!(levels.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Priority::default(), Priority::NORMAL);
        assert_eq!(Priority::NORMAL.get(), 24);
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(-3).is_err());
        assert_eq!(Priority::new(55), Ok(Priority::MAX));
    }

    #[test]
    fn test_states_are_distinct() {
        assert_ne!(ThreadState::Ready, ThreadState::Running);
        assert_ne!(ThreadState::WaitingMessageGet, ThreadState::WaitingMessagePut);
        assert_ne!(OsTaskState::Pend, OsTaskState::PendTimeout);
        assert_ne!(OsPendStatus::Ok, OsPendStatus::Timeout);
    }
}

#[cfg(test)]
mod config_tests {
    use rtos::config::*;

    #[test]
    fn test_config_values() {
        assert_eq!(CFG_PRIO_MAX, 64);
        assert_eq!(CFG_PRIO_IDLE, (CFG_PRIO_MAX - 1) as u8);
        assert_eq!(CFG_TICK_RATE_HZ, 1000);
        assert_eq!(CFG_TICK_WHEEL_SIZE, 16);

        assert!(CFG_STK_SIZE_MIN >= 128);
        assert!(CFG_STK_SIZE_DEFAULT >= CFG_STK_SIZE_MIN);
        assert!(CFG_IDLE_STK_SIZE >= CFG_STK_SIZE_MIN);
        assert!(CFG_TIME_QUANTA_DEFAULT > 0);
    }

    #[test]
    fn test_most_urgent_user_priority_fits() {
        let os_prio = rtos::Priority::MAX.get() as u8;
        assert!(os_prio < CFG_PRIO_IDLE);
    }
}
