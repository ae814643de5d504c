//! Applies [`ConnectOpts`] to the driver-specific pool builders.

use sea_orm::sqlx::postgres::PgPoolOptions;
use sea_orm::sqlx::sqlite::SqlitePoolOptions;

use crate::ConnectOpts;

pub(crate) trait ApplyPoolOpts: Sized {
    fn apply(self, opts: &ConnectOpts) -> Self;
}

macro_rules! impl_apply_pool_opts {
    ($($builder:ty),+ $(,)?) => {$(
        impl ApplyPoolOpts for $builder {
            fn apply(mut self, opts: &ConnectOpts) -> Self {
                if let Some(n) = opts.max_conns {
                    self = self.max_connections(n);
                }
                if let Some(n) = opts.min_conns {
                    self = self.min_connections(n);
                }
                if let Some(t) = opts.acquire_timeout {
                    self = self.acquire_timeout(t);
                }
                if let Some(t) = opts.idle_timeout {
                    self = self.idle_timeout(t);
                }
                if let Some(t) = opts.max_lifetime {
                    self = self.max_lifetime(t);
                }
                self.test_before_acquire(opts.test_before_acquire)
            }
        }
    )+};
}

impl_apply_pool_opts!(PgPoolOptions, SqlitePoolOptions);

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unset_knobs_keep_driver_defaults() {
        let defaults = SqlitePoolOptions::new();
        let applied = SqlitePoolOptions::new().apply(&ConnectOpts {
            max_conns: None,
            min_conns: None,
            acquire_timeout: None,
            idle_timeout: None,
            max_lifetime: None,
            test_before_acquire: true,
        });
        assert_eq!(applied.get_max_connections(), defaults.get_max_connections());
        assert_eq!(applied.get_idle_timeout(), defaults.get_idle_timeout());
    }

    #[test]
    fn set_knobs_are_applied() {
        let applied = PgPoolOptions::new().apply(&ConnectOpts {
            max_conns: Some(3),
            min_conns: Some(1),
            acquire_timeout: Some(Duration::from_secs(2)),
            idle_timeout: Some(Duration::from_secs(60)),
            max_lifetime: None,
            test_before_acquire: false,
        });
        assert_eq!(applied.get_max_connections(), 3);
        assert_eq!(applied.get_min_connections(), 1);
        assert_eq!(applied.get_acquire_timeout(), Duration::from_secs(2));
        assert_eq!(applied.get_idle_timeout(), Some(Duration::from_secs(60)));
        assert!(!applied.get_test_before_acquire());
    }
}
