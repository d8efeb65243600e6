//! Property tests for pool accounting under arbitrary borrow/return sequences.

mod common;

use proptest::prelude::*;
use tidepool::ConnectionPool;

use self::common::{quiet_config, MockFactory};

#[derive(Clone, Copy, Debug)]
enum Op {
    Borrow,
    Return,
}

// ---------------------------------------------------------------------------
// Property: borrowed + idle never exceeds max_active, and size matches both
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn pool_accounting_holds(
        max_active in 1usize..5,
        max_idle in 0usize..5,
        ops in proptest::collection::vec(prop_oneof![Just(Op::Borrow), Just(Op::Return)], 1..40),
    ) {
        let factory = MockFactory::new();
        let mut config = quiet_config(max_active);
        config.with_capacity(0, 0, max_idle.min(max_active), max_active);
        let pool = ConnectionPool::new(config, factory.clone()).unwrap();

        let mut held = Vec::new();
        for op in ops {
            match op {
                Op::Borrow => match pool.try_borrow() {
                    Ok(conn) => held.push(conn),
                    Err(err) => {
                        prop_assert!(err.is_timeout());
                        prop_assert_eq!(held.len(), max_active);
                    }
                },
                Op::Return => {
                    held.pop();
                }
            }
            prop_assert_eq!(pool.active_count(), held.len());
            prop_assert!(pool.active_count() + pool.idle_count() <= max_active);
            prop_assert_eq!(pool.size(), pool.active_count() + pool.idle_count());
            prop_assert!(factory.destroyed_at_most_once());
        }

        drop(held);
        pool.close();
        prop_assert_eq!(pool.size(), 0);
        prop_assert_eq!(factory.destroyed(), factory.created());
        prop_assert!(factory.destroyed_at_most_once());
    }
}
