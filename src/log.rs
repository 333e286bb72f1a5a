//! Logging interface, contingent on the hidden `__log` feature, or on `defmt-03`
//!
//! Only enable `__log` when debugging, and when you're certain that your
//! logger isn't using USB!
//!
//! Format strings are shared by both backends, so stick to plain `{}` and
//! `{:?}` placeholders.

macro_rules! debug {
    ($($args:tt)*) => {{
        #[cfg(feature = "__log")]
        ::__log::debug!($($args)*);
        #[cfg(feature = "defmt-03")]
        ::defmt::debug!($($args)*);
    }};
}

macro_rules! warn {
    ($($args:tt)*) => {{
        #[cfg(feature = "__log")]
        ::__log::warn!($($args)*);
        #[cfg(feature = "defmt-03")]
        ::defmt::warn!($($args)*);
    }};
}

macro_rules! trace {
    ($($args:tt)*) => {{
        #[cfg(feature = "__log")]
        ::__log::trace!($($args)*);
        #[cfg(feature = "defmt-03")]
        ::defmt::trace!($($args)*);
    }};
}
