//! Invariant guards that panic in debug builds and degrade to an error log
//! in release builds, so a bookkeeping bug surfaces loudly in tests without
//! taking a running proxy down.

#[macro_export]
macro_rules! safe_panic {
    ($($arg:tt)*) => {{
        if cfg!(debug_assertions) {
            panic!($($arg)*);
        } else {
            tracing::error!($($arg)*);
        }
    }};
}

#[macro_export]
macro_rules! safe_assert {
    ($cond:expr $(, $($arg:tt)*)?) => {{
        if !$cond {
            $crate::safe_panic!(concat!("ASSERT FAILED: ", stringify!($cond)) $(, $($arg)*)?);
        }
    }};
}

#[macro_export]
macro_rules! safe_assert_eq {
    ($left:expr, $right:expr) => {{
        let (left, right) = (&$left, &$right);
        if left != right {
            $crate::safe_panic!(
                "ASSERT FAILED: {} != {} ({:?} != {:?})",
                stringify!($left),
                stringify!($right),
                left,
                right
            );
        }
    }};
}
